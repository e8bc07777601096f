//! Cross-language matching tables.
//!
//! The synonym clusters and the group rename table are data, versioned
//! independently of the matching algorithm so they can be extended and
//! tested without touching the reconciler itself.

/// Bumped whenever the cluster/rename tables change in a way that can
/// alter classification results.
pub const MATCH_TABLE_VERSION: u32 = 2;

/// Clusters of names considered semantically equivalent across languages.
/// A name belongs to at most one cluster; two names match when their
/// normalized forms land in the same cluster.
pub const SYNONYM_CLUSTERS: &[&[&str]] = &[
    &["mother", "mom", "мама", "мать"],
    &["father", "dad", "папа", "отец"],
    &["phone", "phone number", "телефон", "номер телефона"],
    &["email", "e mail", "mail", "почта", "электронная почта"],
    &["city", "город"],
    &["country", "страна"],
    &["address", "адрес"],
    &["position", "job title", "должность"],
    &["source", "lead source", "источник", "источник сделки"],
    &["budget", "бюджет"],
    &["comment", "comments", "note", "комментарий", "примечание"],
    &["company", "компания"],
    &["website", "site", "сайт"],
    &["birthday", "date of birth", "день рождения", "дата рождения"],
    &["yes", "да"],
    &["no", "нет"],
];

/// Known group renames between the two account schemas. Checked in both
/// directions after normalization.
pub const GROUP_RENAMES: &[(&str, &str)] = &[
    ("основное", "main"),
    ("статистика", "statistics"),
    ("контактная информация", "contact information"),
    ("о компании", "about company"),
    ("default", "основное"),
];

/// Lower-case, strip punctuation, collapse whitespace.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Index of the cluster a normalized name belongs to, if any.
pub fn cluster_of(normalized: &str) -> Option<usize> {
    SYNONYM_CLUSTERS
        .iter()
        .position(|cluster| cluster.contains(&normalized))
}

/// Two names are equivalent when their normalized forms are equal or fall
/// into the same synonym cluster.
pub fn names_equivalent(a: &str, b: &str) -> bool {
    let (na, nb) = (normalize(a), normalize(b));
    if na == nb && !na.is_empty() {
        return true;
    }
    match (cluster_of(&na), cluster_of(&nb)) {
        (Some(ca), Some(cb)) => ca == cb,
        _ => false,
    }
}

/// Group-name equivalence: direct normalized match, synonym cluster, or an
/// entry in the rename table (either direction).
pub fn group_names_equivalent(a: &str, b: &str) -> bool {
    if names_equivalent(a, b) {
        return true;
    }
    let (na, nb) = (normalize(a), normalize(b));
    GROUP_RENAMES.iter().any(|(from, to)| {
        (normalize(from) == na && normalize(to) == nb)
            || (normalize(from) == nb && normalize(to) == na)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  E-Mail  (Work) "), "e mail work");
        assert_eq!(normalize("Телефон"), "телефон");
        assert_eq!(normalize("!!!"), "");
    }

    #[test]
    fn clusters_are_distinct() {
        assert!(names_equivalent("Мама", "Mother"));
        assert!(names_equivalent("папа", "Dad"));
        assert!(!names_equivalent("мама", "father"));
    }

    #[test]
    fn exact_match_needs_no_cluster() {
        assert!(names_equivalent("Deal Budget ", "deal-budget"));
        assert!(!names_equivalent("", ""));
    }

    #[test]
    fn group_rename_table_applies_both_ways() {
        assert!(group_names_equivalent("Основное", "Main"));
        assert!(group_names_equivalent("main", "основное"));
        assert!(group_names_equivalent("Статистика", "statistics"));
        assert!(!group_names_equivalent("Основное", "Statistics"));
    }
}

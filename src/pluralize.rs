//! English pluralisation of resource names for collection endpoints and envelopes.

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
];

const UNCOUNTABLE: &[&str] = &["data", "equipment", "information", "media", "news", "series", "species"];

/// Plural form of a (possibly camelCase) resource name. Only the trailing word is inflected:
/// "widgetCategory" -> "widgetCategories".
pub fn pluralize(singular: &str) -> String {
    if singular.is_empty() {
        return String::new();
    }
    let split = singular
        .char_indices()
        .filter(|(_, c)| c.is_uppercase())
        .map(|(i, _)| i)
        .last()
        .unwrap_or(0);
    let (head, word) = singular.split_at(split);
    format!("{}{}", head, pluralize_word(word))
}

fn pluralize_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, _)| *s == lower) {
        return keep_initial_case(word, plural);
    }
    let stem = |n: usize| word[..word.len() - n].to_string();
    match lower.as_str() {
        s if s.ends_with('y') && s.len() > 1 && !ends_with_vowel_y(s) => format!("{}ies", stem(1)),
        s if ["s", "sh", "ch", "x", "z"].iter().any(|e| s.ends_with(e)) => format!("{}es", word),
        s if s.ends_with("fe") && s.len() > 2 => format!("{}ves", stem(2)),
        s if s.ends_with('f') && !s.ends_with("ff") && !s.ends_with("oof") && s.len() > 1 => format!("{}ves", stem(1)),
        s if s.ends_with('o') && s.len() > 1 && !ends_with_vowel_o(s) && !["photo", "piano", "halo", "memo", "logo"].contains(&s) => {
            format!("{}es", word)
        }
        _ => format!("{}s", word),
    }
}

fn ends_with_vowel_y(s: &str) -> bool {
    ["ay", "ey", "iy", "oy", "uy"].iter().any(|e| s.ends_with(e))
}

fn ends_with_vowel_o(s: &str) -> bool {
    ["ao", "eo", "io", "oo", "uo"].iter().any(|e| s.ends_with(e))
}

fn keep_initial_case(original: &str, plural: &str) -> String {
    if original.starts_with(|c: char| c.is_uppercase()) {
        crate::case::upper_first(plural)
    } else {
        plural.to_string()
    }
}

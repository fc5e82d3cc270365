//! Identifier casing for resource names: base keys are camelCase, default table names snake_case.

/// Convert a single identifier from snake_case to camelCase.
/// e.g. "widget_tag" -> "widgetTag", "created_at" -> "createdAt"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    lower_first(&out)
}

/// Convert a single identifier from camelCase to snake_case.
/// e.g. "widgetTag" -> "widget_tag", "WidgetTag" -> "widget_tag"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Lower-case the first character only: "WidgetTag" -> "widgetTag".
pub fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Upper-case the first character only: "softDelete" -> "SoftDelete".
pub fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

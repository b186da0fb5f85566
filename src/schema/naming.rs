/// Converts an entity or field name to snake case.
///
/// `OrderLine` becomes `order_line`, `HTTPServer` becomes `http_server`.
/// Characters that are not alphanumeric become underscores.
pub fn snake_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    out
}

/// Name of the foreign-key sibling synthesized for a single reference.
pub fn reference_key_name(property: &str) -> String {
    format!("{}_id", snake_case(property))
}

/// Name of the back-reference key a collection adds to its target.
pub fn back_reference_key_name(owner_entity: &str) -> String {
    format!("{}_id", snake_case(owner_entity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Customer"), "customer");
        assert_eq!(snake_case("OrderLine"), "order_line");
        assert_eq!(snake_case("HTTPServer"), "http_server");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("Line2Item"), "line2_item");
    }

    #[test]
    fn test_key_names() {
        assert_eq!(reference_key_name("customer"), "customer_id");
        assert_eq!(back_reference_key_name("OrderLine"), "order_line_id");
    }
}

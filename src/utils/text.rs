//! Small text helpers for human-facing names

/// "user_account_id" -> "User Account Id"
pub fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// "user_account_id" -> "user account id"
pub fn humanize(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_cases_underscored_names() {
        assert_eq!(title_case("user_id"), "User Id");
        assert_eq!(title_case("order"), "Order");
        assert_eq!(title_case("__odd__name"), "Odd Name");
    }

    #[test]
    fn humanizes_names() {
        assert_eq!(humanize("created_at"), "created at");
    }
}

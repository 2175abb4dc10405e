//! User and conversation lookups backing the list views.

use shared::domain::UserSummary;

/// Case-insensitive substring match on usernames. A blank query keeps everyone.
pub fn filter_users<'a>(users: &'a [UserSummary], query: &str) -> Vec<&'a UserSummary> {
    let needle = query.trim().to_lowercase();
    users
        .iter()
        .filter(|user| needle.is_empty() || user.username.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use shared::domain::UserId;

    use super::*;

    fn users() -> Vec<UserSummary> {
        ["alice", "Bob", "bobby_tables"]
            .iter()
            .enumerate()
            .map(|(idx, name)| UserSummary {
                id: UserId(idx as i64 + 1),
                username: name.to_string(),
                email: None,
            })
            .collect()
    }

    #[test]
    fn matches_case_insensitively() {
        let users = users();
        let names: Vec<&str> = filter_users(&users, "BOB")
            .into_iter()
            .map(|u| u.username.as_str())
            .collect();
        assert_eq!(names, vec!["Bob", "bobby_tables"]);
    }

    #[test]
    fn blank_query_keeps_everyone() {
        let users = users();
        assert_eq!(filter_users(&users, "  ").len(), 3);
        assert!(filter_users(&users, "carol").is_empty());
    }
}

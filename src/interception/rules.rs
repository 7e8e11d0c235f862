// src/interception/rules.rs
//! Default-response resolution with keyword overrides

use crate::recording::models::EndpointConfig;

/// Response chosen for a call before any operator involvement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResponse {
    pub body: String,
    pub project: String,
    /// Id of the rule that overrode the default, if any
    pub matched_rule: Option<i64>,
}

/// Resolve the effective response for `payload`.
///
/// Rules are checked in their stored order and the first keyword contained
/// in the payload wins. Without a configuration the global fallback is
/// used.
pub fn resolve_response(config: Option<&EndpointConfig>, payload: &str, fallback: &str) -> ResolvedResponse {
    let Some(config) = config else {
        return ResolvedResponse {
            body: fallback.to_string(),
            project: String::new(),
            matched_rule: None,
        };
    };

    let matched = config
        .rules
        .iter()
        .find(|rule| !rule.keyword.is_empty() && payload.contains(&rule.keyword));

    match matched {
        Some(rule) => ResolvedResponse {
            body: rule.response.clone(),
            project: config.project.clone(),
            matched_rule: Some(rule.id),
        },
        None => ResolvedResponse {
            body: config.default_response.clone(),
            project: config.project.clone(),
            matched_rule: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::models::ResponseRule;
    use proptest::prelude::*;

    fn config_with_rules(rules: &[(&str, &str)]) -> EndpointConfig {
        EndpointConfig {
            id: 1,
            endpoint: "/e".to_string(),
            source: String::new(),
            project: "billing".to_string(),
            remark: String::new(),
            default_response: "D".to_string(),
            rules: rules
                .iter()
                .enumerate()
                .map(|(i, (keyword, response))| ResponseRule {
                    id: i as i64 + 1,
                    config_id: 1,
                    keyword: keyword.to_string(),
                    response: response.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let config = config_with_rules(&[("A", "R1"), ("B", "R2")]);

        let resolved = resolve_response(Some(&config), "xxBxx", "F");
        assert_eq!(resolved.body, "R2");
        assert_eq!(resolved.matched_rule, Some(2));

        let resolved = resolve_response(Some(&config), "AB", "F");
        assert_eq!(resolved.body, "R1");
    }

    #[test]
    fn test_no_match_keeps_default() {
        let config = config_with_rules(&[("A", "R1"), ("B", "R2")]);
        let resolved = resolve_response(Some(&config), "nothing here", "F");
        assert_eq!(resolved.body, "D");
        assert_eq!(resolved.project, "billing");
        assert_eq!(resolved.matched_rule, None);
    }

    #[test]
    fn test_missing_config_uses_fallback() {
        let resolved = resolve_response(None, "A", "F");
        assert_eq!(resolved.body, "F");
        assert!(resolved.project.is_empty());
    }

    #[test]
    fn test_empty_keyword_never_matches() {
        let config = config_with_rules(&[("", "R0"), ("B", "R2")]);
        assert_eq!(resolve_response(Some(&config), "B", "F").body, "R2");
        assert_eq!(resolve_response(Some(&config), "x", "F").body, "D");
    }

    proptest! {
        #[test]
        fn prop_payload_without_keywords_gets_default(payload in "[c-z ]{0,40}") {
            let config = config_with_rules(&[("A", "R1"), ("B", "R2")]);
            prop_assert_eq!(resolve_response(Some(&config), &payload, "F").body, "D");
        }

        #[test]
        fn prop_only_b_selects_second_rule(prefix in "[c-z]{0,10}", suffix in "[c-z]{0,10}") {
            let config = config_with_rules(&[("A", "R1"), ("B", "R2")]);
            let payload = format!("{}B{}", prefix, suffix);
            prop_assert_eq!(resolve_response(Some(&config), &payload, "F").body, "R2");
        }
    }
}

//! Placeholder substitution in task parameters.
//!
//! Task configs are written once per repository family and refer to
//! event-specific values through `##NAME##` placeholders, e.g.
//! `"job": "##GHREPONAME##-pr-##GHPRNUM##"`. Before orchestration every string
//! value in every task's parameters (at any depth, and in sub-tasks) has each
//! known placeholder replaced.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::{EventId, Task};
use crate::types::status::non_empty_str;

pub const REPO_NAME: &str = "##GHREPONAME##";
pub const REPO_FULL_NAME: &str = "##GHREPOFULLNAME##";
pub const REPO_OWNER: &str = "##GHREPOOWNER##";
pub const PR_NUMBER: &str = "##GHPRNUM##";
pub const COMMIT_SHA: &str = "##GHCOMMITSHA##";
pub const BRANCH: &str = "##GHBRANCH##";
pub const BASE_BRANCH: &str = "##GHBASEBRANCH##";
pub const EVENT_ID: &str = "##GHEVENTID##";

/// Placeholder -> replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<String, String>);

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, placeholder: impl Into<String>, value: impl Into<String>) {
        self.0.insert(placeholder.into(), value.into());
    }

    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.0.get(placeholder).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replaces every placeholder occurrence in `input`.
    pub fn apply(&self, input: &str) -> String {
        if !input.contains("##") {
            return input.to_string();
        }
        self.0
            .iter()
            .fold(input.to_string(), |acc, (placeholder, value)| {
                acc.replace(placeholder.as_str(), value)
            })
    }
}

/// Extracts the standard placeholders from a pull-request style payload.
///
/// Values missing from the payload are left out, so their placeholders stay
/// in place.
pub fn basic_template(payload: &Value, event_id: &EventId) -> TemplateVars {
    let mut vars = TemplateVars::new();

    let strings = [
        (REPO_NAME, "/repository/name"),
        (REPO_FULL_NAME, "/repository/full_name"),
        (REPO_OWNER, "/repository/owner/login"),
        (COMMIT_SHA, "/pull_request/head/sha"),
        (BRANCH, "/pull_request/head/ref"),
        (BASE_BRANCH, "/pull_request/base/ref"),
    ];
    for (placeholder, pointer) in strings {
        if let Some(value) = non_empty_str(payload, pointer) {
            vars.insert(placeholder, value);
        }
    }

    if let Some(number) = payload.pointer("/pull_request/number").and_then(Value::as_u64) {
        vars.insert(PR_NUMBER, number.to_string());
    }
    vars.insert(EVENT_ID, event_id.as_str());

    vars
}

/// Returns `tasks` with placeholders substituted in all parameter strings.
pub fn template_replace(vars: &TemplateVars, tasks: &[Task]) -> Vec<Task> {
    tasks.iter().map(|task| replace_task(vars, task)).collect()
}

fn replace_task(vars: &TemplateVars, task: &Task) -> Task {
    let mut task = task.clone();
    for value in task.parameters.values_mut() {
        replace_value(vars, value);
    }
    task.sub_tasks = template_replace(vars, &task.sub_tasks);
    task
}

fn replace_value(vars: &TemplateVars, value: &mut Value) {
    match value {
        Value::String(s) => *s = vars.apply(s),
        Value::Array(items) => items.iter_mut().for_each(|v| replace_value(vars, v)),
        Value::Object(map) => map.values_mut().for_each(|v| replace_value(vars, v)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pull_request_payload;
    use proptest::prelude::*;
    use serde_json::json;

    fn vars() -> TemplateVars {
        basic_template(&pull_request_payload("opened"), &EventId::from("evt-42"))
    }

    #[test]
    fn extracts_pull_request_fields() {
        let vars = vars();
        assert_eq!(vars.get(REPO_NAME), Some("hello-world"));
        assert_eq!(vars.get(REPO_FULL_NAME), Some("octocat/hello-world"));
        assert_eq!(vars.get(REPO_OWNER), Some("octocat"));
        assert_eq!(vars.get(PR_NUMBER), Some("42"));
        assert_eq!(vars.get(COMMIT_SHA), Some("a".repeat(40).as_str()));
        assert_eq!(vars.get(BRANCH), Some("feature/login"));
        assert_eq!(vars.get(BASE_BRANCH), Some("main"));
        assert_eq!(vars.get(EVENT_ID), Some("evt-42"));
    }

    #[test]
    fn missing_fields_are_left_out() {
        let vars = basic_template(&json!({}), &EventId::from("e"));
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get(REPO_NAME), None);
    }

    #[test]
    fn replaces_nested_parameters_and_sub_tasks() {
        let tasks = vec![
            Task::new("jenkins", "build")
                .with_parameter("job", "##GHREPONAME##-pr-##GHPRNUM##")
                .with_parameter(
                    "env",
                    json!({ "BRANCH": "##GHBRANCH##", "list": ["##GHBASEBRANCH##", 3] }),
                )
                .with_parameter("retries", 2)
                .with_sub_tasks(vec![
                    Task::new("lint", "style").with_parameter("sha", "##GHCOMMITSHA##"),
                ]),
        ];

        let replaced = template_replace(&vars(), &tasks);
        let params = &replaced[0].parameters;

        assert_eq!(params["job"], json!("hello-world-pr-42"));
        assert_eq!(params["env"]["BRANCH"], json!("feature/login"));
        assert_eq!(params["env"]["list"], json!(["main", 3]));
        assert_eq!(params["retries"], json!(2));
        assert_eq!(
            replaced[0].sub_tasks[0].parameters["sha"],
            json!("a".repeat(40))
        );
        // The input is untouched.
        assert_eq!(tasks[0].parameters["job"], json!("##GHREPONAME##-pr-##GHPRNUM##"));
    }

    #[test]
    fn unknown_placeholders_are_kept() {
        let tasks = vec![Task::new("ci", "x").with_parameter("p", "##NOPE## ##GHEVENTID##")];
        let replaced = template_replace(&vars(), &tasks);
        assert_eq!(replaced[0].parameters["p"], json!("##NOPE## evt-42"));
    }

    #[test]
    fn context_and_executor_are_not_templated() {
        let tasks = vec![Task::new("##GHREPONAME##", "##GHREPONAME##")];
        let replaced = template_replace(&vars(), &tasks);
        assert_eq!(replaced[0].executor, "##GHREPONAME##");
        assert_eq!(replaced[0].context, "##GHREPONAME##");
    }

    proptest! {
        #[test]
        fn text_without_placeholders_is_unchanged(text in "[a-zA-Z0-9 _/.-]{0,64}") {
            prop_assert_eq!(vars().apply(&text), text);
        }

        #[test]
        fn placeholder_is_replaced_in_any_surrounding(
            prefix in "[a-z0-9 ]{0,16}",
            suffix in "[a-z0-9 ]{0,16}",
        ) {
            let input = format!("{prefix}{REPO_NAME}{suffix}");
            prop_assert_eq!(vars().apply(&input), format!("{prefix}hello-world{suffix}"));
        }
    }
}

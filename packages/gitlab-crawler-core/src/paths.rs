//! Canonical output path builders, relative to `outputDir`.

pub fn groups() -> String {
    "groups.jsonl".to_string()
}

pub fn projects() -> String {
    "projects.jsonl".to_string()
}

pub fn group_details(gid: i64) -> String {
    format!("groups/{gid}/details.json")
}

pub fn group_subgroups(gid: i64) -> String {
    format!("groups/{gid}/subgroups.jsonl")
}

pub fn group_members(gid: i64) -> String {
    format!("groups/{gid}/members.jsonl")
}

pub fn group_projects(gid: i64) -> String {
    format!("groups/{gid}/projects.jsonl")
}

pub fn group_issues(gid: i64) -> String {
    format!("groups/{gid}/issues.jsonl")
}

pub fn project_details(pid: i64) -> String {
    format!("projects/{pid}/details.json")
}

pub fn project_branches(pid: i64) -> String {
    format!("projects/{pid}/branches.jsonl")
}

pub fn project_merge_requests(pid: i64) -> String {
    format!("projects/{pid}/merge_requests.jsonl")
}

pub fn project_issues(pid: i64) -> String {
    format!("projects/{pid}/issues.jsonl")
}

pub fn project_milestones(pid: i64) -> String {
    format!("projects/{pid}/milestones.jsonl")
}

pub fn project_releases(pid: i64) -> String {
    format!("projects/{pid}/releases.jsonl")
}

pub fn project_pipelines(pid: i64) -> String {
    format!("projects/{pid}/pipelines.jsonl")
}

pub fn project_vulnerabilities(pid: i64) -> String {
    format!("projects/{pid}/vulnerabilities.jsonl")
}

pub fn merge_request_discussions(pid: i64, iid: i64) -> String {
    format!("projects/{pid}/merge_requests/{iid}/discussions.jsonl")
}

pub fn issue_discussions(pid: i64, iid: i64) -> String {
    format!("projects/{pid}/issues/{iid}/discussions.jsonl")
}

pub fn pipeline_details(pid: i64, pipeline_id: i64) -> String {
    format!("projects/{pid}/pipelines/{pipeline_id}/details.json")
}

pub fn pipeline_test_report(pid: i64, pipeline_id: i64) -> String {
    format!("projects/{pid}/pipelines/{pipeline_id}/test-report.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_canonical_layout() {
        assert_eq!(group_details(7), "groups/7/details.json");
        assert_eq!(
            merge_request_discussions(42, 3),
            "projects/42/merge_requests/3/discussions.jsonl"
        );
        assert_eq!(
            pipeline_test_report(1, 99),
            "projects/1/pipelines/99/test-report.json"
        );
    }
}

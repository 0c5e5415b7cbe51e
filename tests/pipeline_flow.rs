mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{body_json, Integrations, TestApp};
use serde_json::{json, Value};

const EXTRACTION: &str = r#"```json
[
  {"title": "CSV export is slow", "category": "performance", "pain_level": "high",
   "context": "exports take ten minutes", "tech_approach": "stream rows",
   "expected_outcome": "exports finish in seconds"},
  {"title": "Login form forgets email", "category": "ux", "pain_level": "low",
   "context": "users retype their email", "tech_approach": "remember the last email",
   "expected_outcome": "faster login"},
  {"title": "Broken item", "pain_level": "catastrophic",
   "context": "x", "tech_approach": "y"}
]
```"#;

const REQUIREMENT: &str = "```markdown\n# Requirements: CSV export is slow\n\nStream rows to the client.\n```";

const DESIGN: &str = r#"```json
{"project_name": "exporter", "tech_stack": {"language": "python", "framework": "", "dependencies": []},
 "file_structure": [{"path": "export.py", "description": "streams rows", "type": "entrypoint"}],
 "implementation_order": ["export.py"], "notes": ""}
```"#;

const CODE: &str = "```python\ndef export(rows):\n    yield from rows\n```";

async fn manual_source(app: &TestApp) -> Result<String> {
    let created = app
        .post_json(
            "/api/sources/manual",
            &json!({ "label": "Support chat", "content": "alice: exports take ten minutes" }),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let source = body_json(created).await?;
    Ok(source["id"].as_str().unwrap_or_default().to_string())
}

fn id_of(value: &Value, field: &str) -> String {
    value[field].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn chat_to_pull_request() -> Result<()> {
    let app = TestApp::new();
    let source_id = manual_source(&app).await?;

    app.model.push(EXTRACTION).await;
    let accepted = app
        .post_json("/api/issues/extract", &json!({ "source_id": source_id }))
        .await?;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    let accepted = body_json(accepted).await?;
    assert_eq!(accepted["status"], "processing");
    let batch_id = id_of(&accepted, "batch_id");
    assert_eq!(app.run_jobs().await?, 1);

    let prompts = app.model.prompts().await;
    assert!(prompts[0].contains("alice: exports take ten minutes"));

    let issues = body_json(app.get("/api/issues").await?).await?;
    let issues = issues.as_array().cloned().unwrap_or_default();
    assert_eq!(issues.len(), 2);
    assert!(issues.iter().all(|issue| issue["extraction_batch_id"] == batch_id.as_str()));
    assert!(issues.iter().all(|issue| issue["status"] == "new"));

    let high = body_json(app.get("/api/issues?pain_level=high").await?).await?;
    assert_eq!(high.as_array().map(Vec::len), Some(1));
    let issue_id = id_of(&high[0], "id");
    assert_eq!(high[0]["description"], "CSV export is slow");

    let source = body_json(app.get(&format!("/api/sources/{source_id}")).await?).await?;
    assert_eq!(source["issue_count"], 2);

    let selected = body_json(app.post_empty(&format!("/api/issues/{issue_id}/select")).await?).await?;
    assert_eq!(selected["status"], "selected");

    app.model.push(REQUIREMENT).await;
    let accepted = app
        .post_json(
            "/api/requirements/generate",
            &json!({ "issue_ids": [issue_id, "missing-issue"] }),
        )
        .await?;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    let requirement_id = id_of(&body_json(accepted).await?, "requirement_id");
    assert_eq!(app.run_jobs().await?, 1);

    let requirement =
        body_json(app.get(&format!("/api/requirements/{requirement_id}")).await?).await?;
    assert_eq!(requirement["status"], "draft");
    assert_eq!(requirement["issue_id"], issue_id.as_str());
    assert!(requirement["markdown_content"]
        .as_str()
        .unwrap_or_default()
        .starts_with("# Requirements: CSV export is slow"));

    let linked = body_json(app.get(&format!("/api/issues/{issue_id}")).await?).await?;
    assert_eq!(linked["status"], "in_progress");
    assert_eq!(linked["requirement_id"], requirement_id.as_str());

    let approved = body_json(
        app.post_empty(&format!("/api/requirements/{requirement_id}/approve"))
            .await?,
    )
    .await?;
    assert_eq!(approved["status"], "approved");

    let github = body_json(
        app.post_empty(&format!("/api/requirements/{requirement_id}/github-issue"))
            .await?,
    )
    .await?;
    assert_eq!(github["github_issue_number"], 1);
    let requirement =
        body_json(app.get(&format!("/api/requirements/{requirement_id}")).await?).await?;
    assert_eq!(requirement["github_issue_number"], 1);

    app.code_model.push(DESIGN).await;
    app.code_model.push(CODE).await;
    let accepted = app
        .post_json(
            "/api/developments/start",
            &json!({ "requirement_id": requirement_id }),
        )
        .await?;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    let development_id = id_of(&body_json(accepted).await?, "development_id");
    assert_eq!(app.run_jobs().await?, 1);

    let development =
        body_json(app.get(&format!("/api/developments/{development_id}")).await?).await?;
    assert_eq!(development["status"], "review");
    assert_eq!(development["error_count"], 0);
    assert_eq!(development["generated_files"][0]["path"], "export.py");
    assert_eq!(development["test_results"][0]["success"], true);

    let logs = body_json(
        app.get(&format!("/api/developments/{development_id}/logs"))
            .await?,
    )
    .await?;
    let agents: Vec<&str> = logs
        .as_array()
        .map(|entries| entries.iter().filter_map(|e| e["agent"].as_str()).collect())
        .unwrap_or_default();
    assert!(agents.contains(&"designer"));
    assert!(agents.contains(&"tester"));

    let pull = app
        .post_empty(&format!("/api/developments/{development_id}/pull-request"))
        .await?;
    assert_eq!(pull.status(), StatusCode::OK);
    let pull = body_json(pull).await?;
    let branch = format!("autodev/{}", &development_id[..8]);
    assert_eq!(pull["branch"], branch.as_str());
    assert_eq!(pull["commits"], 1);

    {
        let calls = app.vcs.calls.lock().await;
        assert_eq!(calls.branches, vec![(branch.clone(), "main".to_string())]);
        assert_eq!(calls.files, vec![("export.py".to_string(), branch.clone())]);
        assert_eq!(calls.pulls.len(), 1);
    }

    let development =
        body_json(app.get(&format!("/api/developments/{development_id}")).await?).await?;
    assert_eq!(development["github_branch"], branch.as_str());
    assert_eq!(development["github_pr_number"], 1);
    Ok(())
}

#[tokio::test]
async fn issue_status_only_moves_forward() -> Result<()> {
    let app = TestApp::new();
    let source_id = manual_source(&app).await?;
    app.model.push(EXTRACTION).await;
    app.post_json(
        "/api/issues/extract",
        &json!({ "source_id": source_id, "content": "explicit content wins" }),
    )
    .await?;
    app.run_jobs().await?;
    assert!(app.model.prompts().await[0].contains("explicit content wins"));

    let issues = body_json(app.get("/api/issues?status=new").await?).await?;
    let issue_id = id_of(&issues[0], "id");

    let done = app
        .patch_json(
            &format!("/api/issues/{issue_id}/status"),
            &json!({ "status": "done" }),
        )
        .await?;
    assert_eq!(done.status(), StatusCode::OK);

    let back = app
        .patch_json(
            &format!("/api/issues/{issue_id}/status"),
            &json!({ "status": "selected" }),
        )
        .await?;
    assert_eq!(back.status(), StatusCode::BAD_REQUEST);

    let same = app
        .patch_json(
            &format!("/api/issues/{issue_id}/status"),
            &json!({ "status": "done" }),
        )
        .await?;
    assert_eq!(same.status(), StatusCode::OK);

    let unknown = app
        .patch_json(
            &format!("/api/issues/{issue_id}/status"),
            &json!({ "status": "wontfix" }),
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let deleted = app.delete(&format!("/api/issues/{issue_id}")).await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let gone = app.get(&format!("/api/issues/{issue_id}")).await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn requirement_for_unknown_issues_is_not_found() -> Result<()> {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/api/requirements/generate",
            &json!({ "issue_ids": ["nope"] }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.run_jobs().await?, 0);
    Ok(())
}

#[tokio::test]
async fn extraction_of_missing_source_is_not_found() -> Result<()> {
    let app = TestApp::new();
    let response = app
        .post_json("/api/issues/extract", &json!({ "source_id": "nope" }))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn github_actions_need_configuration() -> Result<()> {
    let app = TestApp::with_integrations(Integrations {
        chat: true,
        vcs: false,
    });

    let status = body_json(app.get("/api/developments/github/status").await?).await?;
    assert_eq!(status["configured"], false);
    assert!(status["repo"].is_null());

    let source_id = manual_source(&app).await?;
    app.model.push(EXTRACTION).await;
    app.post_json("/api/issues/extract", &json!({ "source_id": source_id }))
        .await?;
    app.run_jobs().await?;
    let issues = body_json(app.get("/api/issues").await?).await?;
    let issue_id = id_of(&issues[0], "id");

    app.model.push(REQUIREMENT).await;
    let accepted = app
        .post_json("/api/requirements/generate", &json!({ "issue_ids": [issue_id] }))
        .await?;
    let requirement_id = id_of(&body_json(accepted).await?, "requirement_id");
    app.run_jobs().await?;

    let response = app
        .post_empty(&format!("/api/requirements/{requirement_id}/github-issue"))
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn requirement_edits_respect_transitions() -> Result<()> {
    let app = TestApp::new();
    let source_id = manual_source(&app).await?;
    app.model.push(EXTRACTION).await;
    app.post_json("/api/issues/extract", &json!({ "source_id": source_id }))
        .await?;
    app.run_jobs().await?;
    let issues = body_json(app.get("/api/issues").await?).await?;
    let issue_id = id_of(&issues[0], "id");

    app.model.push(REQUIREMENT).await;
    let accepted = app
        .post_json("/api/requirements/generate", &json!({ "issue_ids": [issue_id] }))
        .await?;
    let requirement_id = id_of(&body_json(accepted).await?, "requirement_id");
    app.run_jobs().await?;

    let edited = app
        .patch_json(
            &format!("/api/requirements/{requirement_id}"),
            &json!({ "markdown_content": "# Edited", "status": "rejected" }),
        )
        .await?;
    assert_eq!(edited.status(), StatusCode::OK);
    let edited = body_json(edited).await?;
    assert_eq!(edited["markdown_content"], "# Edited");
    assert_eq!(edited["status"], "rejected");

    let reopened = app
        .post_empty(&format!("/api/requirements/{requirement_id}/approve"))
        .await?;
    assert_eq!(reopened.status(), StatusCode::BAD_REQUEST);

    let drafts = body_json(app.get("/api/requirements?status=draft").await?).await?;
    assert_eq!(drafts.as_array().map(Vec::len), Some(0));

    let deleted = app
        .delete(&format!("/api/requirements/{requirement_id}"))
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn pull_request_needs_generated_files() -> Result<()> {
    let app = TestApp::new();
    let source_id = manual_source(&app).await?;
    app.model.push(EXTRACTION).await;
    app.post_json("/api/issues/extract", &json!({ "source_id": source_id }))
        .await?;
    app.run_jobs().await?;
    let issues = body_json(app.get("/api/issues").await?).await?;
    let issue_id = id_of(&issues[0], "id");
    app.model.push(REQUIREMENT).await;
    let accepted = app
        .post_json("/api/requirements/generate", &json!({ "issue_ids": [issue_id] }))
        .await?;
    let requirement_id = id_of(&body_json(accepted).await?, "requirement_id");
    app.run_jobs().await?;

    // No design scripted: the manifest is empty and the development fails.
    let accepted = app
        .post_json(
            "/api/developments/start",
            &json!({ "requirement_id": requirement_id }),
        )
        .await?;
    let development_id = id_of(&body_json(accepted).await?, "development_id");
    app.run_jobs().await?;

    let failed = body_json(app.get("/api/developments?status=failed").await?).await?;
    assert_eq!(failed[0]["id"], development_id.as_str());

    let pull = app
        .post_empty(&format!("/api/developments/{development_id}/pull-request"))
        .await?;
    assert_eq!(pull.status(), StatusCode::BAD_REQUEST);
    assert!(app.vcs.calls.lock().await.branches.is_empty());
    Ok(())
}

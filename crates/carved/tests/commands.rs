use std::fs;

use carve_config::{CarveConfig, NamingProviderKind};
use carve_core::StrategyKind;
use carved::cli::{AnalyzeArgs, Commands, JobArgs};
use carved::commands::run_command;
use serde_json::Value;

fn analyze_args(source: std::path::PathBuf, strategies: Vec<StrategyKind>) -> AnalyzeArgs {
    AnalyzeArgs {
        source: Some(source),
        artifact: None,
        include: None,
        exclude: Vec::new(),
        strategies,
    }
}

#[tokio::test]
async fn analyze_prints_report_and_jobs_lists_it() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let package = workspace.path().join("app/src/main/java/com/acme/cart");
    fs::create_dir_all(&package).expect("package dir");
    fs::write(
        package.join("Cart.java"),
        "package com.acme.cart;\n\npublic class Cart {\n    private Item item = new Item();\n\n    public int total() { return item.price(); }\n}\n",
    )
    .expect("write Cart");
    fs::write(
        package.join("Item.java"),
        "package com.acme.cart;\n\npublic class Item {\n    public int price() { return 1; }\n}\n",
    )
    .expect("write Item");
    let config = CarveConfig::default();

    let mut out = Vec::new();
    run_command(
        workspace.path(),
        &config,
        Commands::Analyze(analyze_args(
            workspace.path().join("app"),
            vec![StrategyKind::DomainDriven],
        )),
        &mut out,
    )
    .await
    .expect("analyze");

    let report: Value = serde_json::from_slice(&out).expect("report json");
    assert_eq!(report["job"]["status"], "completed");
    assert_eq!(report["decompositions"][0]["strategy"], "domain_driven");
    let job_id = report["job"]["id"].as_str().expect("job id").to_owned();

    let mut out = Vec::new();
    run_command(workspace.path(), &config, Commands::Jobs, &mut out)
        .await
        .expect("jobs");
    let listing = String::from_utf8(out).expect("utf8");
    assert!(listing.starts_with(&format!("{job_id}\tcompleted\tdomain_driven\t")));

    let mut out = Vec::new();
    run_command(
        workspace.path(),
        &config,
        Commands::Status(JobArgs {
            job_id: job_id.clone(),
        }),
        &mut out,
    )
    .await
    .expect("status");
    let status: Value = serde_json::from_slice(&out).expect("status json");
    assert_eq!(status["id"], job_id.as_str());
}

#[tokio::test]
async fn failed_analysis_is_a_command_error_with_a_report() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut out = Vec::new();

    let err = run_command(
        workspace.path(),
        &CarveConfig::default(),
        Commands::Analyze(analyze_args(
            workspace.path().join("missing"),
            vec![StrategyKind::Louvain],
        )),
        &mut out,
    )
    .await
    .expect_err("missing source root");

    assert!(err.to_string().contains("failed: input:"), "{err}");
    let report: Value = serde_json::from_slice(&out).expect("report json");
    assert_eq!(report["job"]["status"], "failed");
}

#[tokio::test]
async fn http_naming_without_endpoint_still_analyzes_and_queries() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let package = workspace.path().join("app/src/main/java/com/acme/cart");
    fs::create_dir_all(&package).expect("package dir");
    fs::write(
        package.join("Cart.java"),
        "package com.acme.cart;\n\npublic class Cart {\n    private Item item = new Item();\n}\n",
    )
    .expect("write Cart");
    fs::write(
        package.join("Item.java"),
        "package com.acme.cart;\n\npublic class Item {}\n",
    )
    .expect("write Item");
    let mut config = CarveConfig::default();
    config.naming.provider = NamingProviderKind::Http;
    config.naming.endpoint = None;

    let mut out = Vec::new();
    run_command(workspace.path(), &config, Commands::Jobs, &mut out)
        .await
        .expect("jobs without a usable name suggester");
    assert!(out.is_empty());

    let mut out = Vec::new();
    run_command(
        workspace.path(),
        &config,
        Commands::Analyze(analyze_args(
            workspace.path().join("app"),
            vec![StrategyKind::DomainDriven],
        )),
        &mut out,
    )
    .await
    .expect("analyze");
    let report: Value = serde_json::from_slice(&out).expect("report json");
    assert_eq!(report["job"]["status"], "completed");
    let boundaries = report["decompositions"][0]["boundaries"]
        .as_array()
        .expect("boundaries");
    assert!(!boundaries.is_empty());
    assert!(boundaries.iter().all(|boundary| boundary.get("name").is_none()));

    let job_id = report["job"]["id"].as_str().expect("job id").to_owned();
    let mut out = Vec::new();
    run_command(
        workspace.path(),
        &config,
        Commands::Report(JobArgs { job_id }),
        &mut out,
    )
    .await
    .expect("report");
    let report: Value = serde_json::from_slice(&out).expect("report json");
    assert_eq!(report["job"]["status"], "completed");
}

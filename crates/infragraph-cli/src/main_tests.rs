//! CLI tests

use super::*;

#[test]
fn test_cli_definition_is_consistent() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}

#[test]
fn test_sync_collects_repeated_pairs() {
    let cli = Cli::try_parse_from([
        "infragraph", "sync", "--provider", "aws", "--snapshot", "aws.json", "--provider", "gcp",
        "--snapshot", "gcp.json",
    ])
    .unwrap();
    match cli.command {
        Commands::Sync {
            providers, snapshots, ..
        } => {
            assert_eq!(providers, vec!["aws", "gcp"]);
            assert_eq!(snapshots, vec![PathBuf::from("aws.json"), PathBuf::from("gcp.json")]);
        }
        _ => panic!("expected sync"),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["infragraph", "stats", "--format", "json", "--db", "g.db"]).unwrap();
    assert!(cli.format == OutputFormat::Json);
    assert_eq!(cli.db, Some(PathBuf::from("g.db")));
}

#[test]
fn test_sync_requires_a_snapshot() {
    assert!(Cli::try_parse_from(["infragraph", "sync", "--provider", "aws"]).is_err());
}

#[test]
fn test_discovery_options_from_flags() {
    let options = discovery_options(
        &["vpc".to_string()],
        &["us-east-1".to_string()],
        &["env=prod".to_string()],
    )
    .unwrap();
    assert!(options.is_scoped());
    assert!(options.wants_type(ResourceType::Vpc));
    assert!(!options.wants_type(ResourceType::Instance));

    assert!(discovery_options(&[], &[], &["env".to_string()]).is_err());
    assert!(discovery_options(&["teapot".to_string()], &[], &[]).is_err());
}

#[test]
fn test_parse_provider() {
    assert_eq!(parse_provider("gcp").unwrap(), CloudProvider::Gcp);
    assert!(parse_provider("oracle").is_err());
}

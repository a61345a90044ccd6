//! Tests for document parsing, canonical serialization and hashing.

use super::*;
use crate::model::{MaterialConfig, PipelineConfig, StageConfig, DEFAULT_GROUP_NAME};

const MINIMAL: &str = r#"
schema_version = 3

[server]
artifacts_dir = "artifacts"
"#;

fn sample_config() -> CruiseConfig {
    let mut pipeline = PipelineConfig::new("build");
    pipeline
        .materials
        .push(MaterialConfig::git("https://example.com/app.git"));
    pipeline.stages.push(StageConfig::with_job("compile", "make"));

    let mut config = CruiseConfig::new();
    config.add_pipeline(DEFAULT_GROUP_NAME, pipeline);
    config
}

mod parse_tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let parsed = load_document(MINIMAL).unwrap();

        assert_eq!(parsed.config, CruiseConfig::new());
        assert_eq!(parsed.source_schema_version, CURRENT_SCHEMA_VERSION);
        assert!(!parsed.was_migrated());
    }

    #[test]
    fn test_text_without_document_structure_is_rejected_in_prolog() {
        let result = parse_document("abc");

        assert_eq!(
            result,
            Err(ConfigStoreError::Parse {
                reason: "Content is not allowed in prolog.".to_string()
            })
        );
    }

    #[test]
    fn test_empty_text_is_rejected() {
        let result = parse_document("   \n\n");

        assert_eq!(
            result,
            Err(ConfigStoreError::Parse {
                reason: "Premature end of file.".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let result = parse_document("schema_version = \n[server");

        assert!(matches!(result, Err(ConfigStoreError::Parse { .. })));
    }

    #[test]
    fn test_missing_schema_version_is_rejected() {
        let result = parse_document("[server]\nartifacts_dir = \"a\"\n");

        assert_eq!(
            result,
            Err(ConfigStoreError::Parse {
                reason: "Schema version is missing".to_string()
            })
        );
    }

    #[test]
    fn test_non_integer_schema_version_is_rejected() {
        let result = parse_document("schema_version = \"three\"\n");

        assert!(matches!(result, Err(ConfigStoreError::Parse { .. })));
    }

    #[test]
    fn test_zero_schema_version_is_unsupported() {
        let result = parse_document("schema_version = 0\n");

        assert_eq!(
            result,
            Err(ConfigStoreError::UnsupportedSchemaVersion {
                found: 0,
                current: CURRENT_SCHEMA_VERSION
            })
        );
    }

    #[test]
    fn test_future_schema_version_is_unsupported() {
        let result = parse_document("schema_version = 99\n");

        assert!(matches!(
            result,
            Err(ConfigStoreError::UnsupportedSchemaVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_unknown_material_type_is_a_parse_error() {
        let text = r#"
schema_version = 3

[[pipeline_groups]]
name = "grp"

[[pipeline_groups.pipelines]]
name = "build"

[[pipeline_groups.pipelines.materials]]
type = "perforce"
url = "p4://example"
"#;

        let result = parse_document(text);

        assert!(matches!(result, Err(ConfigStoreError::Parse { .. })));
    }
}

mod migration_tests {
    use super::*;

    #[test]
    fn test_version_one_document_is_migrated() {
        let text = r#"
schema_version = 1

[mailhost]
host = "smtp.example.com"
port = 587
sender_email = "go@example.com"
admin_email = "admin@example.com"

[[pipelines]]
name = "legacy"

[[pipelines.materials]]
type = "hg"
url = "https://hg.example.com/repo"

[[pipelines.stages]]
name = "build"

[[pipelines.stages.jobs]]
name = "compile"
"#;

        let parsed = load_document(text).unwrap();

        assert!(parsed.was_migrated());
        assert_eq!(parsed.source_schema_version, 1);
        assert_eq!(parsed.config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(
            parsed.config.find_group(DEFAULT_GROUP_NAME).map(|g| g.pipelines.len()),
            Some(1)
        );
        let mail_host = parsed.config.server.mail_host.unwrap();
        assert_eq!(mail_host.hostname, "smtp.example.com");
        assert_eq!(mail_host.port, 587);
    }

    #[test]
    fn test_version_two_document_keeps_groups() {
        let text = r#"
schema_version = 2

[[pipeline_groups]]
name = "first"

[[pipeline_groups.pipelines]]
name = "build"
"#;

        let parsed = load_document(text).unwrap();

        assert_eq!(parsed.source_schema_version, 2);
        assert_eq!(parsed.config.all_pipeline_names(), vec!["build"]);
        assert!(parsed.config.server.mail_host.is_none());
    }
}

mod canonical_form_tests {
    use super::*;

    #[test]
    fn test_serialize_then_parse_preserves_document() {
        let config = sample_config();

        let text = serialize(&config).unwrap();
        let reparsed = parse_document(&text).unwrap();

        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_canonical_hash_is_stable() {
        let config = sample_config();

        let first = canonicalize(&config).unwrap();
        let second = canonicalize(&config.clone()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.md5, md5_hex(first.content.as_bytes()));
    }

    #[test]
    fn test_canonical_hash_changes_with_content() {
        let config = sample_config();
        let mut changed = config.clone();
        changed.server.site_url = Some("https://ci.example.com".to_string());

        assert_ne!(
            canonicalize(&config).unwrap().md5,
            canonicalize(&changed).unwrap().md5
        );
    }

    #[test]
    fn test_md5_hex_known_value() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}

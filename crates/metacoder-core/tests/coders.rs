//! Coder contract tests against the dummy coder and the default registry.

use std::sync::Arc;

use metacoder_core::{
    Coder, CoderIdentity, CoderRegistry, DummyCoder, DummyScript, ExtensionCollection,
    ExtensionSpec, InvocationContext, ModelSpec, CAP_EXTENSIONS,
};
use serde_json::json;

fn scripted() -> DummyCoder {
    DummyCoder::new().with_default_script(
        DummyScript::default()
            .with_tool("mcp__fs__read_file", json!({"path": "README.md"}), Some("# readme"))
            .with_tool("Bash", json!({"command": "ls"}), Some("README.md")),
    )
}

#[tokio::test]
async fn dummy_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let coder = scripted();
    let ctx = InvocationContext::new("list files", dir.path(), ModelSpec::new("none", "dummy"));

    let first = coder.invoke(&ctx).await;
    let second = coder.invoke(&ctx).await;

    assert_eq!(first.output, second.output);
    assert_eq!(first.tool_invocations, second.tool_invocations);
    assert_eq!(first.content_digest(), second.content_digest());
}

#[tokio::test]
async fn tool_records_follow_invocation_order() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = InvocationContext::new("list files", dir.path(), ModelSpec::new("none", "dummy"));
    let result = scripted().invoke(&ctx).await;

    let indexes: Vec<usize> = result.tool_invocations.iter().map(|r| r.index).collect();
    assert_eq!(indexes, vec![0, 1]);
    assert_eq!(result.tool_invocations[0].extension.as_deref(), Some("fs"));
    assert_eq!(result.tool_invocations[1].tool, "Bash");
}

#[tokio::test]
async fn registry_dispatches_through_trait_objects() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CoderRegistry::new().with(Arc::new(DummyCoder::new()));
    let coder = registry.resolve("dummy").unwrap();

    let ctx = InvocationContext::new("ping", dir.path(), ModelSpec::new("none", "dummy"));
    let result = coder.invoke(&ctx).await;
    assert_eq!(result.output, "you said: ping");
    assert_eq!(coder.identity(), CoderIdentity::Dummy);
}

#[test]
fn default_registry_advertises_capabilities() {
    let registry = CoderRegistry::with_defaults();

    let opencode = registry.require(CoderIdentity::Opencode).unwrap();
    assert!(!opencode.supports_extensions());
    assert!(!opencode.capability_flags().contains(CAP_EXTENSIONS));

    let claude = registry.require(CoderIdentity::Claude).unwrap();
    assert!(claude.supports_extensions());
    assert!(claude.default_extensions().is_empty());

    let goose = registry.require(CoderIdentity::Goose).unwrap();
    assert!(goose.default_extensions().get("developer").is_some());
}

#[test]
fn case_override_wins_over_coder_defaults() {
    let goose = CoderRegistry::with_defaults()
        .require(CoderIdentity::Goose)
        .unwrap();
    let plan = ExtensionCollection::new().with(ExtensionSpec::stdio("pdf", "uvx", vec![]));
    let case = ExtensionCollection::new().with(ExtensionSpec::stdio("developer", "goose", vec![]).disabled());

    let merged = ExtensionCollection::merged([&goose.default_extensions(), &plan, &case]);
    let names: Vec<&str> = merged.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["developer", "pdf"]);
    assert!(!merged.get("developer").unwrap().enabled);
}

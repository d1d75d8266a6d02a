//! Build pipeline tests against fake fetcher and runtime

use std::sync::Arc;

use async_trait::async_trait;

use hostengine::deploy::docker::DockerCli;
use hostengine::deploy::pipeline::{Pipeline, PipelineSettings};
use hostengine::errors::EngineError;
use hostengine::models::deployment::{
    Deployment, DeploymentPatch, DeploymentStatus, NewDeployment,
};
use hostengine::store::deployments::{DeploymentLedger, DeploymentStore};
use hostengine::store::projects::ProjectCatalog;

use crate::support::{project, FakeFetcher, FakeRuntime, Harness, HEAD_HASH, HOST_PORT, REPO_URL};

async fn queue(harness: &Harness, project_id: &str) -> String {
    harness
        .ledger
        .create(NewDeployment {
            project_id: project_id.to_string(),
            commit_hash: "from-webhook".to_string(),
            commit_message: None,
            user_id: None,
        })
        .await
        .unwrap()
        .id
}

fn static_site() -> FakeFetcher {
    FakeFetcher::with_files(&[("dist/index.html", "<h1>hi</h1>")])
}

#[tokio::test]
async fn test_successful_deployment_is_ready() {
    let mut site = project("p1");
    site.build_command = Some("npm run build".to_string());
    site.environment_variables
        .insert("NODE_ENV".to_string(), "production".to_string());
    let harness = Harness::new(vec![site], static_site(), FakeRuntime::default());
    let id = queue(&harness, "p1").await;

    let status = harness.pipeline.run(&id).await.unwrap();
    assert_eq!(status, DeploymentStatus::Ready);

    let deployment = harness.ledger.get(&id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Ready);
    assert_eq!(
        deployment.deployment_url,
        Some(format!("http://localhost:{}", HOST_PORT))
    );
    assert!(deployment.error_message.is_none());
    assert_eq!(deployment.commit_hash, HEAD_HASH);
    assert_eq!(deployment.commit_message.as_deref(), Some("Add landing page"));
    assert_eq!(deployment.build_logs, "building...\ndone\n");

    assert_eq!(
        harness.fetcher.fetched.lock().unwrap().clone(),
        vec![(REPO_URL.to_string(), "main".to_string())]
    );
    let env = harness.runtime.build_env.lock().unwrap().clone().unwrap();
    assert_eq!(env.get("NODE_ENV").map(String::as_str), Some("production"));

    let tag = format!("localhost:5000/p1:{}", id);
    assert_eq!(
        harness.runtime.calls(),
        vec![
            "run_command npm run build".to_string(),
            format!("build_image {}", tag),
            format!("run_container hostengine-{}", &id[..8]),
            format!("assigned_host_port hostengine-{}", &id[..8]),
        ]
    );

    let containers = harness.runtime.containers.lock().unwrap().clone();
    assert_eq!(containers[0].image, tag);
    assert_eq!(containers[0].container_port, 80);
    assert_eq!(containers[0].restart_policy, "always");
}

#[tokio::test]
async fn test_image_is_built_from_output_directory() {
    let harness = Harness::new(vec![project("p1")], static_site(), FakeRuntime::default());
    let id = queue(&harness, "p1").await;

    harness.pipeline.run(&id).await.unwrap();

    let contexts = harness.runtime.image_contexts.lock().unwrap().clone();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].ends_with("dist"));
}

#[tokio::test]
async fn test_build_failure_keeps_logs() {
    let mut site = project("p1");
    site.build_command = Some("npm run build".to_string());
    let runtime = FakeRuntime {
        build_output: vec!["npm ERR! missing script: build\n".to_string()],
        build_exit_code: Some(1),
        ..Default::default()
    };
    let harness = Harness::new(vec![site], static_site(), runtime);
    let id = queue(&harness, "p1").await;

    let status = harness.pipeline.run(&id).await.unwrap();
    assert_eq!(status, DeploymentStatus::Failed);

    let deployment = harness.ledger.get(&id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(deployment.build_logs, "npm ERR! missing script: build\n");
    assert!(deployment
        .error_message
        .as_deref()
        .unwrap()
        .contains("exited with code 1"));
    assert!(deployment.deployment_url.is_none());
    assert_eq!(harness.runtime.calls(), vec!["run_command npm run build"]);
}

#[tokio::test]
async fn test_clone_failure_is_recorded() {
    let harness = Harness::new(
        vec![project("p1")],
        FakeFetcher::failing("Repository not found"),
        FakeRuntime::default(),
    );
    let id = queue(&harness, "p1").await;

    let status = harness.pipeline.run(&id).await.unwrap();
    assert_eq!(status, DeploymentStatus::Failed);

    let deployment = harness.ledger.get(&id).await.unwrap().unwrap();
    let message = deployment.error_message.unwrap();
    assert!(message.contains("Repository not found"), "{}", message);
    assert_eq!(deployment.commit_hash, "from-webhook");
    assert!(harness.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_missing_output_directory_is_created() {
    let harness = Harness::new(
        vec![project("p1")],
        FakeFetcher::with_files(&[("README.md", "static")]),
        FakeRuntime::default(),
    );
    let id = queue(&harness, "p1").await;

    let status = harness.pipeline.run(&id).await.unwrap();
    assert_eq!(status, DeploymentStatus::Ready);
    assert!(!harness
        .runtime
        .calls()
        .iter()
        .any(|call| call.starts_with("run_command")));
}

#[tokio::test]
async fn test_escaping_output_directory_fails() {
    let mut site = project("p1");
    site.output_directory = "../../etc".to_string();
    let harness = Harness::new(vec![site], static_site(), FakeRuntime::default());
    let id = queue(&harness, "p1").await;

    assert_eq!(
        harness.pipeline.run(&id).await.unwrap(),
        DeploymentStatus::Failed
    );
    assert!(harness.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_workdir_removed_on_success_and_failure() {
    let harness = Harness::new(vec![project("p1")], static_site(), FakeRuntime::default());
    let id = queue(&harness, "p1").await;
    harness.pipeline.run(&id).await.unwrap();
    assert_eq!(harness.leftover_workdirs(), 0);

    let harness = Harness::new(
        vec![project("p1")],
        static_site(),
        FakeRuntime::failing_at("run_container"),
    );
    let id = queue(&harness, "p1").await;
    assert_eq!(
        harness.pipeline.run(&id).await.unwrap(),
        DeploymentStatus::Failed
    );
    assert_eq!(harness.leftover_workdirs(), 0);
}

#[tokio::test]
async fn test_default_registry_is_not_pushed() {
    let harness = Harness::new(vec![project("p1")], static_site(), FakeRuntime::default());
    let id = queue(&harness, "p1").await;
    harness.pipeline.run(&id).await.unwrap();

    assert!(!harness
        .runtime
        .calls()
        .iter()
        .any(|call| call.starts_with("push_image")));
}

#[tokio::test]
async fn test_custom_registry_is_pushed() {
    let settings = PipelineSettings {
        registry: "registry.example.com".to_string(),
        public_host: "apps.example.com".to_string(),
        ..Default::default()
    };
    let harness = Harness::with_settings(
        vec![project("p1")],
        static_site(),
        FakeRuntime::default(),
        settings,
    );
    let id = queue(&harness, "p1").await;
    harness.pipeline.run(&id).await.unwrap();

    assert!(harness
        .runtime
        .calls()
        .contains(&format!("push_image registry.example.com/p1:{}", id)));
    let deployment = harness.ledger.get(&id).await.unwrap().unwrap();
    assert_eq!(
        deployment.deployment_url,
        Some(format!("http://apps.example.com:{}", HOST_PORT))
    );
}

#[tokio::test]
async fn test_publish_failure_skips_launch() {
    let settings = PipelineSettings {
        registry: "registry.example.com".to_string(),
        ..Default::default()
    };
    let harness = Harness::with_settings(
        vec![project("p1")],
        static_site(),
        FakeRuntime::failing_at("push_image"),
        settings,
    );
    let id = queue(&harness, "p1").await;

    assert_eq!(
        harness.pipeline.run(&id).await.unwrap(),
        DeploymentStatus::Failed
    );
    assert!(!harness
        .runtime
        .calls()
        .iter()
        .any(|call| call.starts_with("run_container")));
    let deployment = harness.ledger.get(&id).await.unwrap().unwrap();
    assert!(deployment
        .error_message
        .unwrap()
        .contains("registry refused push"));
}

#[tokio::test]
async fn test_unknown_project_fails_deployment() {
    let harness = Harness::new(vec![], static_site(), FakeRuntime::default());
    let id = queue(&harness, "ghost").await;

    assert_eq!(
        harness.pipeline.run(&id).await.unwrap(),
        DeploymentStatus::Failed
    );
    assert!(harness.fetcher.fetched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let harness = Harness::new(vec![project("p1")], static_site(), FakeRuntime::default());
    let err = harness.pipeline.run("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let harness = Harness::new(vec![project("p1")], static_site(), FakeRuntime::default());
    let id = queue(&harness, "p1").await;

    harness.pipeline.run(&id).await.unwrap();
    let calls = harness.runtime.calls().len();

    assert_eq!(
        harness.pipeline.run(&id).await.unwrap(),
        DeploymentStatus::Ready
    );
    assert_eq!(harness.runtime.calls().len(), calls);
    assert_eq!(harness.fetcher.fetched.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_image_build_failure_skips_launch() {
    let harness = Harness::new(
        vec![project("p1")],
        static_site(),
        FakeRuntime::failing_at("build_image"),
    );
    let id = queue(&harness, "p1").await;

    assert_eq!(
        harness.pipeline.run(&id).await.unwrap(),
        DeploymentStatus::Failed
    );

    let deployment = harness.ledger.get(&id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.deployment_url.is_none());
    assert!(deployment
        .error_message
        .unwrap()
        .contains("image build failed"));
    assert!(!harness
        .runtime
        .calls()
        .iter()
        .any(|call| call.starts_with("run_container")));
    assert_eq!(harness.leftover_workdirs(), 0);
}

#[tokio::test]
async fn test_unreachable_container_engine_fails_deployment() {
    let workspace = tempfile::tempdir().unwrap();
    let ledger = Arc::new(DeploymentStore::in_memory());
    let pipeline = Pipeline::new(
        ledger.clone(),
        Arc::new(ProjectCatalog::new(vec![project("p1")])),
        Arc::new(static_site()),
        Arc::new(DockerCli::disconnected("Cannot connect to the Docker daemon")),
        PipelineSettings {
            workspace_root: workspace.path().to_path_buf(),
            ..Default::default()
        },
    );
    let id = ledger
        .create(NewDeployment {
            project_id: "p1".to_string(),
            commit_hash: "from-webhook".to_string(),
            commit_message: None,
            user_id: None,
        })
        .await
        .unwrap()
        .id;

    assert_eq!(pipeline.run(&id).await.unwrap(), DeploymentStatus::Failed);

    let deployment = ledger.get(&id).await.unwrap().unwrap();
    let message = deployment.error_message.unwrap();
    assert!(message.contains("Container runtime unavailable"), "{}", message);
    assert!(message.contains("Cannot connect to the Docker daemon"), "{}", message);
    assert!(deployment.deployment_url.is_none());
    assert_eq!(std::fs::read_dir(workspace.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_container_removed_when_host_port_unknown() {
    let harness = Harness::new(
        vec![project("p1")],
        static_site(),
        FakeRuntime::failing_at("assigned_host_port"),
    );
    let id = queue(&harness, "p1").await;

    assert_eq!(
        harness.pipeline.run(&id).await.unwrap(),
        DeploymentStatus::Failed
    );

    let name = format!("hostengine-{}", &id[..8]);
    let calls = harness.runtime.calls();
    assert_eq!(
        &calls[calls.len() - 3..],
        &[
            format!("run_container {}", name),
            format!("assigned_host_port {}", name),
            format!("remove_container {}", name),
        ]
    );
    let deployment = harness.ledger.get(&id).await.unwrap().unwrap();
    assert!(deployment.deployment_url.is_none());
    assert!(deployment
        .error_message
        .unwrap()
        .contains("no host port published"));
}

/// Ledger whose `ready` writes fail
struct ReadyRefusingLedger(DeploymentStore);

#[async_trait]
impl DeploymentLedger for ReadyRefusingLedger {
    async fn create(&self, new: NewDeployment) -> Result<Deployment, EngineError> {
        self.0.create(new).await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError> {
        self.0.get(id).await
    }

    async fn update(&self, id: &str, patch: DeploymentPatch) -> Result<Deployment, EngineError> {
        if patch.status == Some(DeploymentStatus::Ready) {
            return Err(EngineError::StorageError("disk full".to_string()));
        }
        self.0.update(id, patch).await
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deployment>, EngineError> {
        self.0.list_by_project(project_id).await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Deployment>, EngineError> {
        self.0.list_by_user(user_id).await
    }

    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, EngineError> {
        self.0.list_by_status(status).await
    }
}

#[tokio::test]
async fn test_container_removed_when_ready_cannot_be_recorded() {
    let workspace = tempfile::tempdir().unwrap();
    let ledger = Arc::new(ReadyRefusingLedger(DeploymentStore::in_memory()));
    let runtime = Arc::new(FakeRuntime::default());
    let pipeline = Pipeline::new(
        ledger.clone(),
        Arc::new(ProjectCatalog::new(vec![project("p1")])),
        Arc::new(static_site()),
        runtime.clone(),
        PipelineSettings {
            workspace_root: workspace.path().to_path_buf(),
            ..Default::default()
        },
    );
    let id = ledger
        .create(NewDeployment {
            project_id: "p1".to_string(),
            commit_hash: "from-webhook".to_string(),
            commit_message: None,
            user_id: None,
        })
        .await
        .unwrap()
        .id;

    assert_eq!(pipeline.run(&id).await.unwrap(), DeploymentStatus::Failed);

    assert_eq!(
        runtime.calls().last(),
        Some(&format!("remove_container hostengine-{}", &id[..8]))
    );
    let deployment = ledger.get(&id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.deployment_url.is_none());
    assert!(deployment.error_message.unwrap().contains("disk full"));
}

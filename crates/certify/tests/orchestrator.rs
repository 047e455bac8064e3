//! Deployment orchestration against an in-memory Fuel master on paused time.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::time::Instant;

use certify::api::{
    ClusterAttributes, ClusterStatus, CreateClusterRequest, DiscoveredNode, Disk, NetProvider,
    NetworkConfiguration, NodeInterface, Task, TaskStatus, GB,
};
use certify::descriptor::ClusterDescriptor;
use certify::snapshot::capture_descriptor;
use certify::{
    CertifyError, DeploymentOrchestrator, DeploymentStage, ManagedOptions, OrchestratorConfig,
    RemoteCluster, RemoteClusterService, Result,
};

const DESCRIPTOR: &str = r#"
name: cert-ha
release: 2
deployment_mode: ha_compact
settings:
  net_provider: neutron
  net_segment_type: gre
  volumes_ceph: true
nodes:
  - name: ctrl
    mac: "aa:bb:cc:dd:ee:01"
    roles: [controller]
    interfaces:
      eth0: [public]
      eth1: [management, storage]
  - requirements: { cpu_count_min: 4 }
    roles: [compute]
network_config:
  networks:
    public:
      cidr: 10.0.0.0/24
nodes_discovery_timeout: 30
deploy_timeout: 60
"#;

fn descriptor() -> ClusterDescriptor {
    ClusterDescriptor::from_yaml(DESCRIPTOR).unwrap()
}

fn node(id: u64, cpu: u64) -> DiscoveredNode {
    DiscoveredNode {
        id,
        mac: format!("AA:BB:CC:DD:EE:{id:02X}"),
        name: None,
        cpu_total: cpu,
        memory_total_bytes: 16 * GB,
        disks: vec![Disk {
            size_bytes: 500 * GB,
        }],
        cluster: None,
        roles: vec![],
        pending_roles: vec![],
    }
}

fn default_interfaces() -> Vec<NodeInterface> {
    serde_json::from_value(json!([
        {"id": 100, "name": "eth0", "assigned_networks": [
            {"id": 1, "name": "public"}, {"id": 2, "name": "management"}
        ]},
        {"id": 101, "name": "eth1", "assigned_networks": [{"id": 3, "name": "storage"}]}
    ]))
    .unwrap()
}

/// Scripted service state.
struct State {
    nodes: Vec<DiscoveredNode>,
    /// Nodes that show up once `list_nodes` has been called this many times.
    late_nodes: Option<(u32, Vec<DiscoveredNode>)>,
    list_calls: u32,
    clusters: BTreeMap<u64, RemoteCluster>,
    /// Deleted clusters still visible for this many lookups.
    deleting: HashMap<u64, (RemoteCluster, u32)>,
    next_id: u64,
    attributes: ClusterAttributes,
    saved_attributes: Option<ClusterAttributes>,
    interfaces: HashMap<u64, Vec<NodeInterface>>,
    network: NetworkConfiguration,
    saved_network: Option<NetworkConfiguration>,
    status_polls: u32,
    operational_after: u32,
    cluster_error: bool,
    task_polls: u32,
    tasks_ready_after: u32,
    task_error: bool,
    /// `get_tasks` panics, as a broken service implementation would.
    tasks_panic: bool,
    calls: Vec<String>,
}

struct FakeFuel {
    state: Mutex<State>,
}

impl FakeFuel {
    fn new(nodes: Vec<DiscoveredNode>) -> Self {
        Self {
            state: Mutex::new(State {
                nodes,
                late_nodes: None,
                list_calls: 0,
                clusters: BTreeMap::new(),
                deleting: HashMap::new(),
                next_id: 1,
                attributes: serde_json::from_value(json!({
                    "editable": {
                        "common": {"debug": {"value": true, "label": "Debug logging"}},
                        "storage": {"volumes_ceph": {"value": false}}
                    },
                    "generated": {"mysql": {"root_password": "x"}}
                }))
                .unwrap(),
                saved_attributes: None,
                interfaces: HashMap::new(),
                network: serde_json::from_value(json!({
                    "net_provider": "neutron",
                    "networks": [
                        {"id": 10, "name": "public", "cidr": "172.16.0.0/24"},
                        {"id": 11, "name": "management", "cidr": "192.168.0.0/24"},
                        {"id": 12, "name": "storage", "cidr": "192.168.1.0/24"}
                    ],
                    "networking_parameters": {"segmentation_type": "gre"}
                }))
                .unwrap(),
                saved_network: None,
                status_polls: 0,
                operational_after: 3,
                cluster_error: false,
                task_polls: 0,
                tasks_ready_after: 2,
                task_error: false,
                tasks_panic: false,
                calls: Vec::new(),
            }),
        }
    }

    fn lab() -> Arc<Self> {
        Arc::new(Self::new(vec![node(1, 2), node(2, 8), node(3, 2)]))
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    async fn service_cluster(&self, name: &str) -> Option<u64> {
        self.get_cluster_by_name(name).await.unwrap()
    }
}

#[async_trait]
impl RemoteClusterService for FakeFuel {
    async fn list_nodes(&self) -> Result<Vec<DiscoveredNode>> {
        Ok(self.with(|s| {
            s.list_calls += 1;
            let due = s
                .late_nodes
                .as_ref()
                .is_some_and(|(after, _)| s.list_calls >= *after);
            if due {
                if let Some((_, late)) = s.late_nodes.take() {
                    s.nodes.extend(late);
                }
            }
            s.nodes.clone()
        }))
    }

    async fn get_cluster_by_name(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.with(|s| s.clusters.values().find(|c| c.name == name).map(|c| c.id)))
    }

    async fn get_cluster(&self, cluster_id: u64) -> Result<Option<RemoteCluster>> {
        Ok(self.with(|s| {
            if let Some(cluster) = s.clusters.get(&cluster_id) {
                return Some(cluster.clone());
            }
            match s.deleting.get_mut(&cluster_id) {
                Some((cluster, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(cluster.clone())
                }
                _ => None,
            }
        }))
    }

    async fn create_cluster(&self, req: CreateClusterRequest) -> Result<RemoteCluster> {
        Ok(self.with(|s| {
            let id = s.next_id;
            s.next_id += 1;
            s.calls.push(format!("create {}", req.name));
            let cluster = RemoteCluster {
                id,
                name: req.name,
                status: ClusterStatus::New,
                mode: Some(req.mode),
                release_id: Some(req.release),
                net_provider: req.net_provider,
                nodes: vec![],
                tasks: vec![],
                stage: DeploymentStage::Created,
            };
            s.clusters.insert(id, cluster.clone());
            cluster
        }))
    }

    async fn get_cluster_attributes(&self, _cluster_id: u64) -> Result<ClusterAttributes> {
        Ok(self.with(|s| s.saved_attributes.clone().unwrap_or_else(|| s.attributes.clone())))
    }

    async fn update_cluster_attributes(&self, cluster_id: u64, attrs: &ClusterAttributes) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("attributes {cluster_id}"));
            s.saved_attributes = Some(attrs.clone());
        });
        Ok(())
    }

    async fn add_node(&self, cluster_id: u64, node_id: u64, roles: &[String]) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("add_node {cluster_id} {node_id}"));
            if let Some(node) = s.nodes.iter_mut().find(|n| n.id == node_id) {
                node.cluster = Some(cluster_id);
                node.pending_roles = roles.to_vec();
            }
        });
        Ok(())
    }

    async fn get_node_interfaces(&self, node_id: u64) -> Result<Vec<NodeInterface>> {
        Ok(self.with(|s| {
            s.interfaces
                .get(&node_id)
                .cloned()
                .unwrap_or_else(default_interfaces)
        }))
    }

    async fn update_node_interfaces(&self, node_id: u64, interfaces: &[NodeInterface]) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("interfaces {node_id}"));
            s.interfaces.insert(node_id, interfaces.to_vec());
        });
        Ok(())
    }

    async fn get_cluster_network_config(
        &self,
        _cluster_id: u64,
        _net_provider: NetProvider,
    ) -> Result<NetworkConfiguration> {
        Ok(self.with(|s| s.saved_network.clone().unwrap_or_else(|| s.network.clone())))
    }

    async fn update_cluster_network_config(
        &self,
        cluster_id: u64,
        net_provider: NetProvider,
        config: &NetworkConfiguration,
    ) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("network {cluster_id} {net_provider}"));
            s.saved_network = Some(config.clone());
        });
        Ok(())
    }

    async fn start_deploy(&self, cluster_id: u64) -> Result<()> {
        self.with(|s| s.calls.push(format!("deploy {cluster_id}")));
        Ok(())
    }

    async fn get_cluster_status(&self, _cluster_id: u64) -> Result<ClusterStatus> {
        Ok(self.with(|s| {
            s.status_polls += 1;
            if s.cluster_error {
                ClusterStatus::Error
            } else if s.status_polls >= s.operational_after {
                ClusterStatus::Operational
            } else {
                ClusterStatus::Deploying
            }
        }))
    }

    async fn get_tasks(&self, _cluster_id: u64) -> Result<Vec<Task>> {
        if self.with(|s| s.tasks_panic) {
            panic!("task listing blew up");
        }
        Ok(self.with(|s| {
            s.task_polls += 1;
            let status = if s.task_error {
                TaskStatus::Error
            } else if s.task_polls >= s.tasks_ready_after {
                TaskStatus::Ready
            } else {
                TaskStatus::Running
            };
            vec![
                Task {
                    id: 1,
                    name: "provision".into(),
                    status: TaskStatus::Ready,
                    message: None,
                },
                Task {
                    id: 2,
                    name: "deployment".into(),
                    status,
                    message: s.task_error.then(|| "puppet failed on node-2".to_string()),
                },
            ]
        }))
    }

    async fn delete_cluster(&self, cluster_id: u64) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("delete {cluster_id}"));
            if let Some(cluster) = s.clusters.remove(&cluster_id) {
                s.deleting.insert(cluster_id, (cluster, 2));
            }
            for node in &mut s.nodes {
                if node.cluster == Some(cluster_id) {
                    node.cluster = None;
                    node.pending_roles.clear();
                }
            }
        });
        Ok(())
    }
}

fn orchestrator(fake: &Arc<FakeFuel>) -> DeploymentOrchestrator<FakeFuel> {
    DeploymentOrchestrator::new(Arc::clone(fake), OrchestratorConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_managed_cluster_end_to_end() {
    let fake = FakeFuel::lab();
    let orchestrator = orchestrator(&fake);

    let seen = orchestrator
        .with_managed_cluster(&descriptor(), ManagedOptions::default(), |cluster| async move {
            Ok::<_, CertifyError>(cluster)
        })
        .await
        .unwrap();

    assert_eq!(seen.stage, DeploymentStage::Operational);
    assert_eq!(seen.status, ClusterStatus::Operational);
    assert_eq!(seen.nodes, vec![1, 2]);
    assert_eq!(seen.tasks.len(), 2);
    assert!(seen.tasks.iter().all(|t| t.status == TaskStatus::Ready));

    assert_eq!(
        fake.calls(),
        vec![
            "create cert-ha",
            "attributes 1",
            "add_node 1 1",
            "interfaces 1",
            "add_node 1 2",
            "network 1 neutron",
            "deploy 1",
            "delete 1",
        ]
    );

    fake.with(|s| {
        let attrs = s.saved_attributes.as_ref().unwrap();
        assert_eq!(attrs.editable["common"]["debug"]["value"], json!(false));
        assert_eq!(attrs.editable["common"]["debug"]["label"], json!("Debug logging"));
        assert_eq!(attrs.editable["storage"]["volumes_ceph"]["value"], json!(true));
        assert!(attrs.extra.contains_key("generated"));

        let ifaces = &s.interfaces[&1];
        let eth1: Vec<u64> = ifaces[1].assigned_networks.iter().map(|n| n.id).collect();
        assert_eq!(ifaces[0].assigned_networks.len(), 1);
        assert_eq!(eth1, vec![2, 3]);

        let network = serde_json::to_value(s.saved_network.as_ref().unwrap()).unwrap();
        assert_eq!(network["networks"][0]["cidr"], json!("10.0.0.0/24"));
        assert_eq!(network["networks"][0]["id"], json!(10));
        assert_eq!(network["networks"][1]["cidr"], json!("192.168.0.0/24"));

        assert!(s.clusters.is_empty());
        assert!(s.nodes.iter().all(DiscoveredNode::is_unassigned));
    });
}

#[tokio::test(start_paused = true)]
async fn test_deploy_cluster_leaves_cluster_running() {
    let fake = FakeFuel::lab();
    let cluster = orchestrator(&fake).deploy_cluster(&descriptor()).await.unwrap();

    assert_eq!(cluster.stage, DeploymentStage::Operational);
    assert!(!fake.called("delete"));
    fake.with(|s| {
        let assigned: Vec<(u64, Vec<String>)> = s
            .nodes
            .iter()
            .filter(|n| n.cluster == Some(cluster.id))
            .map(|n| (n.id, n.pending_roles.clone()))
            .collect();
        assert_eq!(
            assigned,
            vec![(1, vec!["controller".to_string()]), (2, vec!["compute".to_string()])]
        );
    });
}

#[tokio::test(start_paused = true)]
async fn test_discovery_waits_for_late_nodes() {
    let fake = Arc::new(FakeFuel::new(vec![node(1, 2)]));
    fake.with(|s| s.late_nodes = Some((4, vec![node(2, 8)])));
    let start = Instant::now();

    let matched = orchestrator(&fake)
        .discover_and_match(&descriptor().nodes, Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(matched.len(), 2);
    assert_eq!(matched[1].node.id, 2);
    assert_eq!(fake.with(|s| s.list_calls), 4);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_times_out() {
    let fake = Arc::new(FakeFuel::new(vec![node(1, 2)]));
    let start = Instant::now();

    let err = orchestrator(&fake)
        .discover_and_match(&descriptor().nodes, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, CertifyError::Timeout { ref label, secs: 5 } if label == "nodes discovery"));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed <= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_match_failure_is_fatal_at_once() {
    // Enough nodes, but none with the pinned MAC.
    let fake = Arc::new(FakeFuel::new(vec![node(2, 8), node(3, 8)]));
    let start = Instant::now();

    let err = orchestrator(&fake)
        .discover_and_match(&descriptor().nodes, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, CertifyError::NodeNotFound { ref requirement } if requirement.contains("AA:BB:CC:DD:EE:01")));
    assert_eq!(fake.with(|s| s.list_calls), 1);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_assigned_nodes_are_not_matched() {
    let fake = FakeFuel::lab();
    fake.with(|s| s.nodes[1].cluster = Some(42));

    let err = orchestrator(&fake)
        .discover_and_match(&descriptor().nodes, Duration::from_secs(3))
        .await
        .unwrap_err();

    // Node 2 is the only one with 4+ CPUs and it belongs to another cluster.
    assert!(matches!(err, CertifyError::NodeNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cluster_error_fails_fast_and_cleans_up() {
    let fake = FakeFuel::lab();
    fake.with(|s| s.cluster_error = true);
    let start = Instant::now();

    let err = orchestrator(&fake)
        .with_managed_cluster(&descriptor(), ManagedOptions::default(), |_| async {
            Ok::<_, CertifyError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CertifyError::RemoteTaskError { ref subject, .. } if subject == "cluster 1"));
    assert_eq!(fake.with(|s| s.status_polls), 1);
    assert!(fake.called("delete 1"));
    // One status poll, then two deletion polls.
    assert!(start.elapsed() <= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_task_error_fails_deploy() {
    let fake = FakeFuel::lab();
    fake.with(|s| s.task_error = true);
    let orchestrator = orchestrator(&fake);

    let mut cluster = orchestrator.create_empty(&descriptor()).await.unwrap();
    let err = orchestrator
        .deploy(&mut cluster, Duration::from_secs(60))
        .await
        .unwrap_err();

    assert!(
        matches!(err, CertifyError::RemoteTaskError { ref message, .. } if message == "puppet failed on node-2")
    );
    assert_eq!(cluster.stage, DeploymentStage::Failed);
    assert_eq!(fake.with(|s| s.task_polls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_timeout() {
    let fake = FakeFuel::lab();
    fake.with(|s| s.operational_after = u32::MAX);
    let orchestrator = orchestrator(&fake);
    let start = Instant::now();

    let mut cluster = orchestrator.create_empty(&descriptor()).await.unwrap();
    let err = orchestrator
        .deploy(&mut cluster, Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, CertifyError::Timeout { ref label, secs: 10 } if label == "deploy cluster"));
    assert_eq!(cluster.stage, DeploymentStage::Failed);
    assert!(start.elapsed() <= Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn test_body_error_still_deletes() {
    let fake = FakeFuel::lab();

    let err = orchestrator(&fake)
        .with_managed_cluster(&descriptor(), ManagedOptions::default(), |_| async {
            Err::<(), _>(anyhow::anyhow!("tests crashed"))
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "tests crashed");
    assert!(fake.called("delete 1"));
}

#[tokio::test(start_paused = true)]
async fn test_body_panic_still_deletes() {
    let fake = FakeFuel::lab();
    let orchestrator = orchestrator(&fake);

    let outcome = AssertUnwindSafe(orchestrator.with_managed_cluster(
        &descriptor(),
        ManagedOptions::default(),
        |_| async {
            if true {
                panic!("test body panicked");
            }
            Ok::<(), CertifyError>(())
        },
    ))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert!(fake.called("delete 1"));
}

#[tokio::test(start_paused = true)]
async fn test_panic_during_deploy_still_deletes() {
    let fake = FakeFuel::lab();
    fake.with(|s| s.tasks_panic = true);
    let orchestrator = orchestrator(&fake);

    let outcome = AssertUnwindSafe(orchestrator.with_managed_cluster(
        &descriptor(),
        ManagedOptions::default(),
        |_| async { Ok::<(), CertifyError>(()) },
    ))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert!(fake.called("deploy 1"));
    assert!(fake.called("delete 1"));
    assert!(fake.with(|s| s.clusters.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_deployment_still_deletes() {
    let fake = FakeFuel::lab();
    fake.with(|s| s.operational_after = u32::MAX);
    let orchestrator = orchestrator(&fake);

    let descriptor = descriptor();
    let deployment = orchestrator.with_managed_cluster(
        &descriptor,
        ManagedOptions::default(),
        |_| async { Ok::<(), CertifyError>(()) },
    );
    let result = tokio::time::timeout(Duration::from_secs(5), deployment).await;
    assert!(result.is_err());

    orchestrator.finish_cleanups().await;

    assert!(fake.called("delete 1"));
    assert!(fake.with(|s| s.clusters.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_retained_deployment_is_kept() {
    let fake = FakeFuel::lab();
    fake.with(|s| s.operational_after = u32::MAX);
    let orchestrator = orchestrator(&fake);
    let options = ManagedOptions {
        retain: true,
        ..ManagedOptions::default()
    };

    let descriptor = descriptor();
    let deployment =
        orchestrator.with_managed_cluster(&descriptor, options, |_| async { Ok::<(), CertifyError>(()) });
    assert!(tokio::time::timeout(Duration::from_secs(5), deployment).await.is_err());

    orchestrator.finish_cleanups().await;

    assert!(!fake.called("delete"));
    assert_eq!(fake.with(|s| s.clusters.len()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retained_cluster_is_kept() {
    let fake = FakeFuel::lab();
    let options = ManagedOptions {
        retain: true,
        ..ManagedOptions::default()
    };

    orchestrator(&fake)
        .with_managed_cluster(&descriptor(), options, |_| async { Ok::<_, CertifyError>(()) })
        .await
        .unwrap();

    assert!(!fake.called("delete"));
    assert_eq!(fake.with(|s| s.clusters.len()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replace_existing_deletes_first() {
    let fake = FakeFuel::lab();
    let orchestrator = orchestrator(&fake);
    let stale = orchestrator.create_empty(&descriptor()).await.unwrap();
    let options = ManagedOptions {
        replace_existing: true,
        retain: true,
    };

    let fresh = orchestrator
        .with_managed_cluster(&descriptor(), options, |cluster| async move {
            Ok::<_, CertifyError>(cluster.id)
        })
        .await
        .unwrap();

    assert_ne!(fresh, stale.id);
    let calls = fake.calls();
    let deleted = calls.iter().position(|c| *c == format!("delete {}", stale.id)).unwrap();
    let created = calls.iter().rposition(|c| c == "create cert-ha").unwrap();
    assert!(deleted < created);
}

#[tokio::test(start_paused = true)]
async fn test_existing_cluster_is_reused() {
    let fake = FakeFuel::lab();
    let orchestrator = orchestrator(&fake);

    let first = orchestrator.create_empty(&descriptor()).await.unwrap();
    let second = orchestrator.create_empty(&descriptor()).await.unwrap();

    assert_eq!(first.id, second.id);
    let creates = fake.calls().iter().filter(|c| c.starts_with("create")).count();
    let attribute_updates = fake.calls().iter().filter(|c| c.starts_with("attributes")).count();
    assert_eq!(creates, 1);
    assert_eq!(attribute_updates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_attribute_rejected() {
    let fake = FakeFuel::lab();
    fake.with(|s| {
        s.attributes.editable.remove("storage");
    });

    let err = orchestrator(&fake)
        .create_empty(&descriptor())
        .await
        .unwrap_err();

    assert!(
        matches!(err, CertifyError::UnknownAttribute { ref section, ref option } if section == "storage" && option == "volumes_ceph")
    );
    assert!(!fake.called("attributes"));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_network_in_layout_stops_before_update() {
    let fake = FakeFuel::lab();
    let mut descriptor = descriptor();
    descriptor.nodes[0]
        .interfaces
        .as_mut()
        .unwrap()
        .insert("eth0".into(), vec!["fuelweb_admin".into()]);

    let err = orchestrator(&fake).deploy_cluster(&descriptor).await.unwrap_err();

    assert!(matches!(err, CertifyError::UnknownNetwork { ref network, .. } if network == "fuelweb_admin"));
    assert!(!fake.called("interfaces"));
    assert!(!fake.called("deploy"));
}

#[tokio::test(start_paused = true)]
async fn test_delete_if_exists() {
    let fake = FakeFuel::lab();
    let orchestrator = orchestrator(&fake);

    assert!(!orchestrator.delete_if_exists("cert-ha").await.unwrap());
    orchestrator.create_empty(&descriptor()).await.unwrap();
    assert!(orchestrator.delete_if_exists("cert-ha").await.unwrap());
    assert!(fake.with(|s| s.clusters.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_delete_waits_for_cluster_to_disappear() {
    let fake = FakeFuel::lab();
    let orchestrator = orchestrator(&fake);
    let mut cluster = orchestrator.deploy_cluster(&descriptor()).await.unwrap();
    let start = Instant::now();

    orchestrator.delete(&mut cluster).await.unwrap();

    assert_eq!(cluster.stage, DeploymentStage::Deleted);
    // Visible for two lookups after the delete call.
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_captured_descriptor_redeploys() {
    let fake = FakeFuel::lab();
    let orchestrator = orchestrator(&fake);
    let cluster = orchestrator.deploy_cluster(&descriptor()).await.unwrap();

    let captured = capture_descriptor(&*fake, cluster.id).await.unwrap();

    assert_eq!(captured.name, "cert-ha");
    assert_eq!(captured.settings.net_segment_type.as_deref(), Some("gre"));
    assert_eq!(captured.settings.attributes.get("volumes_ceph"), Some(&Value::Bool(true)));
    let macs: Vec<&str> = captured.nodes.iter().filter_map(|n| n.mac.as_deref()).collect();
    assert_eq!(macs, vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"]);
    assert_eq!(captured.nodes[0].interfaces.as_ref().unwrap()["eth1"], vec!["management", "storage"]);

    orchestrator.delete_if_exists("cert-ha").await.unwrap();
    let redeployed = orchestrator.deploy_cluster(&captured).await.unwrap();
    assert_eq!(redeployed.nodes, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_two_node_controller_compute() {
    let controller = DiscoveredNode {
        mac: "AA:BB:CC:DD:EE:FF".into(),
        ..node(7, 2)
    };
    let fake = Arc::new(FakeFuel::new(vec![controller, node(8, 2)]));
    let descriptor = ClusterDescriptor::from_yaml(
        r#"
name: two-node
release: 1
deployment_mode: multinode
nodes:
  - mac: "AA:BB:CC:DD:EE:FF"
    roles: [controller]
  - requirements: { cpu_count_min: 2 }
    roles: [compute]
"#,
    )
    .unwrap();
    let orchestrator = orchestrator(&fake);

    let nodes = orchestrator
        .with_managed_cluster(&descriptor, ManagedOptions::default(), |cluster| async move {
            Ok::<_, CertifyError>(cluster.nodes)
        })
        .await
        .unwrap();

    assert_eq!(nodes, vec![7, 8]);
    assert_eq!(fake.service_cluster("two-node").await, None);
    assert!(!fake.called("network"));
}

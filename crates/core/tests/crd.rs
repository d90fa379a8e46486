#![forbid(unsafe_code)]

use kube::CustomResourceExt;
use stratum_core::LedgerCluster;

#[test]
fn generated_crd_serves_status_subresource() {
    let crd = LedgerCluster::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("ledgerclusters.stratum.dev"));
    assert_eq!(crd.spec.names.kind, "LedgerCluster");

    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());

    let doc = serde_json::to_value(&crd).expect("crd json");
    let props = &doc["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]["properties"];
    assert!(props.get("richWallets").is_some());
    assert!(props.get("benchmarkPods").is_some());
}

//! Prints the CRD manifests managed by this workspace
//!
//! ```sh
//! cargo run -p crds --bin crdgen > config/crd/baremetalhosts.yaml
//! ```

use anyhow::Context;
use crds::BareMetalHost;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&BareMetalHost::crd()).context("failed to render BareMetalHost CRD")?;
    print!("{}", yaml);
    Ok(())
}

//! Prints the SpinnakerService CRD as YAML.
//!
//! ```sh
//! cargo run --bin crdgen > config/crd/spinnakerservice.yaml
//! ```

use kube::CustomResourceExt;
use spinnaker_operator::crd::SpinnakerService;

fn main() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&SpinnakerService::crd())?;
    print!("{crd}");
    Ok(())
}

//! Prints the SetupJob CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/setupjob.yaml`

use crds::SetupJob;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = SetupJob::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}

use grid_operator::crd::GridCluster;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&GridCluster::crd())?;
    println!("{}", yaml);
    Ok(())
}

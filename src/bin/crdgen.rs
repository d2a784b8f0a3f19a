//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the GreetingService
//! custom resource.
//!
//! Usage: cargo run --bin crdgen | kubectl apply -f -

use greeting_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}

use stress_test::{stress_test_convergence, stress_test_scaling};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            CONVERGENCE RUNS                                ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Small run: a few clients contending on one partition
    let small = stress_test_convergence(4, 100).await?;
    small.print();

    // Medium run
    let medium = stress_test_convergence(10, 300).await?;
    medium.print();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(16, 4).await?;

    if !(small.converged && medium.converged) {
        return Err("replicas diverged from the repository".into());
    }
    println!("\n✓ All convergence runs completed successfully!");
    Ok(())
}

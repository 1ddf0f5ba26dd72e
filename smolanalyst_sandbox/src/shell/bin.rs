// Binary entry point for smolanalyst_sandbox
// This is a thin wrapper that delegates to the library implementation

use anyhow::Result;

fn main() -> Result<()> {
    if let Err(e) = smolanalyst_sandbox::shell::run() {
        eprintln!("smolanalyst_sandbox fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

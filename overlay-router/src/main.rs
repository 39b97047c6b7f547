//! Main entry point for CLI command.

fn main() -> anyhow::Result<()> {
    overlay_router::main()
}

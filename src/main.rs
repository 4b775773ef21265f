use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    todo_sync::run().await
}

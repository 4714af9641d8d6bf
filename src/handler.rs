use crate::{
    runner::Runner,
    types::{CaptureEvent, Response},
};

/// Runs the whole event and folds every outcome, fatal ones included, into a
/// response.
pub async fn capture_to_storage(runner: &Runner, event: CaptureEvent) -> Response {
    let items = event.into_items();
    match runner.run(&items).await {
        Ok(summary) => Response {
            status_code: 200,
            body: format!(
                "All data fetched and stored successfully! Last processed name: {}, Total processed: {}.",
                summary.last_processed_name, summary.processed_count
            ),
        },
        Err(e) => {
            error!("a critical error occurred: {}", e);
            Response {
                status_code: 500,
                body: format!("A critical error occurred: {}", e),
            }
        }
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

use crate::types::Participant;
use async_trait::async_trait;

/// Surface offered by the hosting mini-app platform. Injected into the
/// presentation layer instead of being read from an ambient global, so
/// tests and the CLI can supply their own.
#[async_trait]
pub trait Host: Send + Sync {
    /// Show a one-way message to the participant.
    async fn notify(&self, message: &str);

    /// Ask the participant a yes/no question.
    async fn confirm(&self, message: &str) -> bool;

    /// Identity and display name of the participant driving this session.
    fn current_participant(&self) -> Participant;
}

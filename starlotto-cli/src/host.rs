use async_trait::async_trait;
use starlotto_core::{Host, Participant};

/// Terminal stand-in for the mini-app host: alerts go to stdout,
/// confirmations to an interactive prompt, identity comes from the
/// command line.
pub struct CliHost {
    participant: Participant,
    assume_yes: bool,
}

impl CliHost {
    pub fn new(participant: Participant, assume_yes: bool) -> Self {
        Self {
            participant,
            assume_yes,
        }
    }
}

#[async_trait]
impl Host for CliHost {
    async fn notify(&self, message: &str) {
        println!("{message}");
    }

    async fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        dialoguer::Confirm::new()
            .with_prompt(message)
            .default(true)
            .interact()
            .unwrap_or(false)
    }

    fn current_participant(&self) -> Participant {
        self.participant.clone()
    }
}

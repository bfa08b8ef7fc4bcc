#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("at least one worker is required")]
    NoWorkers,

    #[error("failed to spawn worker {slot}: {source}")]
    Spawn {
        slot: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Fan-out backend failures.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("gave up merging {service_id} after {attempts} conflicting writes")]
    Contended { service_id: String, attempts: usize },
}

use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::net::listener::ListenerError;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("listener name `{0}` is declared more than once")]
    DuplicateListener(String),

    #[error("listener name `{0}` is reserved for the self-listener")]
    NameCollision(String),

    #[error("handler name `{handler}` on listener `{listener}` is not a valid path segment")]
    InvalidHandlerName { listener: String, handler: String },

    #[error("handler `{handler}` is registered more than once on listener `{listener}`")]
    DuplicateHandler { listener: String, handler: String },

    #[error("failed to build listener `{listener}`")]
    Build {
        listener: String,
        #[source]
        source: ListenerError,
    },

    #[error("failed to start listener `{listener}`")]
    Start {
        listener: String,
        #[source]
        source: ListenerError,
    },

    #[error("failed to start admin surface")]
    Admin(#[source] std::io::Error),

    #[error("container is {state} and no longer accepts periodic tasks")]
    NotAcceptingTasks { state: LifecycleState },

    #[error("periodic task `{0}` must have a non-zero period")]
    InvalidTask(String),
}

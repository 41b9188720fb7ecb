use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)), visibility(pub(crate)))]
pub enum CompilerError {
    #[snafu(display("Failed to spawn program compiler worker #{index}"))]
    SpawnWorker {
        index: usize,
        source: std::io::Error,
    },

    #[snafu(display("Invalid program compiler configuration: {reason}"))]
    InvalidConfig { reason: String },
}

pub type Result<T, E = CompilerError> = std::result::Result<T, E>;

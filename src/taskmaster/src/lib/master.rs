use crate::error::MasterError;

/// The operations a console can ask of a supervisor, whether it lives in this
/// process or behind the control socket. Every operation answers with a line
/// of text meant for the user
pub trait Master {
    fn start(&mut self, name: &str) -> Result<String, MasterError>;
    fn stop(&mut self, name: &str) -> Result<String, MasterError>;
    fn restart(&mut self, name: &str) -> Result<String, MasterError>;

    /// Status of one task, or of every task when `name` is empty
    fn status(&mut self, name: &str) -> Result<String, MasterError>;

    /// Reloads the task set. An empty `path` reloads the last loaded document
    fn reload_config(&mut self, path: &str) -> Result<String, MasterError>;
    fn exit(&mut self) -> Result<String, MasterError>;
}

pub mod process;
pub mod registry;
pub mod serde;
pub mod task;

pub use self::process::{Process, ProcessSpec, ProcessState};
pub use self::registry::TaskRegistry;
pub use self::serde::{load_config, parse_config, render_config, LoadedConfig};
pub use self::task::{RestartPolicy, Task, TaskConfig, TaskState};

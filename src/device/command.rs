//! Command lists.
//!
//! A [`CommandList`] is allocated by the device for one queue family and filled
//! by a node during `record_commands`. Recording is CPU-only: commands are
//! appended to a stream that the device translates on submission, so recording
//! never blocks and never allocates device memory.

use std::fmt;

use crate::error::{DeviceError, DeviceResult};

use super::types::{ClearValue, FramebufferHandle, QueueFamily, WorkTypeFlags};

/// Recording state of a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// Freshly allocated, nothing recorded.
    Initial,
    /// Between `begin()` and `finish()`.
    Recording,
    /// Finished and ready to submit.
    Executable,
}

impl CommandListState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Recording => "recording",
            Self::Executable => "executable",
        }
    }
}

impl fmt::Display for CommandListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass {
        framebuffer: FramebufferHandle,
        clear: Vec<ClearValue>,
    },
    EndRenderPass,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    Marker(String),
}

/// Command stream for one queue family.
#[derive(Debug)]
pub struct CommandList {
    id: u64,
    queue: QueueFamily,
    work_types: WorkTypeFlags,
    state: CommandListState,
    commands: Vec<Command>,
    in_render_pass: bool,
    triangle_count: u64,
}

impl CommandList {
    /// Create a command list. Called by device implementations.
    pub fn new(id: u64, queue: QueueFamily, work_types: WorkTypeFlags) -> Self {
        Self {
            id,
            queue,
            work_types,
            state: CommandListState::Initial,
            commands: Vec::new(),
            in_render_pass: false,
            triangle_count: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue family this list was allocated from.
    pub fn queue(&self) -> QueueFamily {
        self.queue
    }

    pub fn work_types(&self) -> WorkTypeFlags {
        self.work_types
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_executable(&self) -> bool {
        self.state == CommandListState::Executable
    }

    /// Commands recorded since the last `begin()`.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Triangles drawn since the last `begin()`.
    pub fn triangle_count(&self) -> u64 {
        self.triangle_count
    }

    /// Start recording, discarding anything recorded before.
    pub fn begin(&mut self) -> DeviceResult<()> {
        if self.state == CommandListState::Recording {
            return Err(self.state_error("initial or executable"));
        }
        self.commands.clear();
        self.triangle_count = 0;
        self.in_render_pass = false;
        self.state = CommandListState::Recording;
        Ok(())
    }

    /// Drop everything recorded and return to `Initial`, from any state.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.triangle_count = 0;
        self.in_render_pass = false;
        self.state = CommandListState::Initial;
    }

    /// Stop recording and make the list submittable.
    pub fn finish(&mut self) -> DeviceResult<()> {
        if self.state != CommandListState::Recording {
            return Err(self.state_error("recording"));
        }
        if self.in_render_pass {
            return Err(DeviceError::SubmissionFailed(format!(
                "command list {} finished inside a render pass",
                self.id
            )));
        }
        self.state = CommandListState::Executable;
        Ok(())
    }

    pub fn begin_render_pass(
        &mut self,
        framebuffer: FramebufferHandle,
        clear: &[ClearValue],
    ) -> DeviceResult<()> {
        self.require_work(WorkTypeFlags::GRAPHICS)?;
        if self.in_render_pass {
            return Err(self.state_error("outside a render pass"));
        }
        self.push(Command::BeginRenderPass {
            framebuffer,
            clear: clear.to_vec(),
        })?;
        self.in_render_pass = true;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> DeviceResult<()> {
        self.push_checked(Command::EndRenderPass)?;
        self.in_render_pass = false;
        Ok(())
    }

    /// Like `push`, but the command is only valid inside a render pass.
    fn push_checked(&mut self, command: Command) -> DeviceResult<()> {
        if self.state == CommandListState::Recording && !self.in_render_pass {
            return Err(self.state_error("inside a render pass"));
        }
        self.push(command)
    }

    pub fn draw_primitives(&mut self, vertex_count: u32, instance_count: u32) -> DeviceResult<()> {
        self.require_work(WorkTypeFlags::GRAPHICS)?;
        self.triangle_count += u64::from(vertex_count / 3) * u64::from(instance_count);
        self.push(Command::Draw {
            vertex_count,
            instance_count,
        })
    }

    pub fn draw_indexed_primitives(
        &mut self,
        index_count: u32,
        instance_count: u32,
    ) -> DeviceResult<()> {
        self.require_work(WorkTypeFlags::GRAPHICS)?;
        self.triangle_count += u64::from(index_count / 3) * u64::from(instance_count);
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
        })
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> DeviceResult<()> {
        self.require_work(WorkTypeFlags::COMPUTE)?;
        self.push(Command::Dispatch { x, y, z })
    }

    /// Debug marker, shows up in the device's command stream.
    pub fn insert_marker(&mut self, label: impl Into<String>) -> DeviceResult<()> {
        self.push(Command::Marker(label.into()))
    }

    fn push(&mut self, command: Command) -> DeviceResult<()> {
        if self.state != CommandListState::Recording {
            return Err(self.state_error("recording"));
        }
        self.commands.push(command);
        Ok(())
    }

    fn require_work(&self, work: WorkTypeFlags) -> DeviceResult<()> {
        if self.work_types.contains(work) {
            Ok(())
        } else {
            Err(DeviceError::UnsupportedWorkTypes(work))
        }
    }

    fn state_error(&self, expected: &'static str) -> DeviceError {
        DeviceError::InvalidCommandListState {
            id: self.id,
            actual: self.state.as_str(),
            expected,
        }
    }
}

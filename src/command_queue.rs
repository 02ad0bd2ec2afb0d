//! C6: Command Queue — batches GPU commands behind a single implicit
//! encoder, auto-flushing at a batch limit (§4.6).
//!
//! Grounded in `program.rs::Launcher`/`Execution::step` driving a single
//! `wgpu::CommandEncoder` across many queued `Low` instructions, and
//! `tests/blend.rs`'s `execution.step()` polling loop for the "wait for
//! submitted work" pattern.
use crate::error::EngineError;

/// §4.6: batch auto-flushes once this many commands have been recorded
/// against the current encoder.
pub const MAX_BATCH: usize = 100;

enum State {
    Empty,
    Recording { encoder: wgpu::CommandEncoder, count: usize },
}

/// Owns the single implicit command encoder for a device, lazily
/// beginning recording on the first command and auto-flushing at
/// `MAX_BATCH` (§4.6 "Batching").
pub struct CommandQueue {
    state: State,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue { state: State::Empty }
    }

    fn ensure_recording<'a>(&'a mut self, device: &wgpu::Device) -> &'a mut wgpu::CommandEncoder {
        if matches!(self.state, State::Empty) {
            let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
            self.state = State::Recording { encoder, count: 0 };
        }
        match &mut self.state {
            State::Recording { encoder, .. } => encoder,
            State::Empty => unreachable!(),
        }
    }

    /// Record one command via `record`, bumping the batch counter and
    /// auto-flushing if `MAX_BATCH` is reached (§4.6). If `record`
    /// panics, the half-built encoder is simply dropped — "abandons the
    /// encoder" per the spec, no commands from this batch reach the GPU.
    pub fn add_command(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, record: impl FnOnce(&mut wgpu::CommandEncoder)) {
        {
            let encoder = self.ensure_recording(device);
            record(encoder);
        }
        if let State::Recording { count, .. } = &mut self.state {
            *count += 1;
            if *count >= MAX_BATCH {
                self.flush(device, queue);
            }
        }
    }

    pub fn add_render_pass(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        descriptor_fn: impl FnOnce(&mut wgpu::CommandEncoder),
    ) {
        self.add_command(device, queue, descriptor_fn);
    }

    pub fn add_compute_pass(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        descriptor_fn: impl FnOnce(&mut wgpu::CommandEncoder),
    ) {
        self.add_command(device, queue, descriptor_fn);
    }

    pub fn add_texture_copy(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        src: wgpu::ImageCopyTexture,
        dst: wgpu::ImageCopyTexture,
        size: wgpu::Extent3d,
    ) {
        self.add_command(device, queue, |encoder| {
            encoder.copy_texture_to_texture(src, dst, size);
        });
    }

    pub fn add_buffer_copy(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        src: &wgpu::Buffer,
        src_offset: u64,
        dst: &wgpu::Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        self.add_command(device, queue, |encoder| {
            encoder.copy_buffer_to_buffer(src, src_offset, dst, dst_offset, size);
        });
    }

    /// Submit whatever is recorded; a no-op on an empty queue (§4.6
    /// "Flushing an empty batch is a no-op, not an error").
    pub fn flush(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let state = std::mem::replace(&mut self.state, State::Empty);
        if let State::Recording { encoder, count } = state {
            if count > 0 {
                queue.submit(std::iter::once(encoder.finish()));
            }
        }
        let _ = device;
    }

    /// Flush and block until the GPU has finished executing everything
    /// submitted so far (§4.6 "flush() returns a completion future").
    pub fn flush_and_wait(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<(), EngineError> {
        self.flush(device, queue);
        device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        match &self.state {
            State::Empty => 0,
            State::Recording { count, .. } => *count,
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_queue_has_no_pending_commands() {
        let queue = CommandQueue::new();
        assert_eq!(queue.pending_count(), 0);
    }
}

// Command recording
//
// The per-frame command stream is written through `CommandRecorder`, so
// the draw decisions (indexed or not, counts, viewport) can be checked
// against a recording mock. `record_frame` is the only place that decides
// what a frame contains.

use ash::prelude::VkResult;
use ash::vk;

pub trait CommandRecorder {
    fn begin(&self, cb: vk::CommandBuffer, one_time: bool) -> VkResult<()>;
    fn end(&self, cb: vk::CommandBuffer) -> VkResult<()>;
    fn begin_render_pass(
        &self,
        cb: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        clear_color: [f32; 4],
    );
    fn end_render_pass(&self, cb: vk::CommandBuffer);
    fn bind_pipeline(&self, cb: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn set_viewport(&self, cb: vk::CommandBuffer, viewport: vk::Viewport);
    fn set_scissor(&self, cb: vk::CommandBuffer, scissor: vk::Rect2D);
    fn bind_vertex_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer);
    fn bind_index_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer);
    fn draw(&self, cb: vk::CommandBuffer, vertex_count: u32);
    fn draw_indexed(&self, cb: vk::CommandBuffer, index_count: u32);
    fn copy_buffer(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
}

impl CommandRecorder for ash::Device {
    fn begin(&self, cb: vk::CommandBuffer, one_time: bool) -> VkResult<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.begin_command_buffer(cb, &info) }
    }

    fn end(&self, cb: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.end_command_buffer(cb) }
    }

    fn begin_render_pass(
        &self,
        cb: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(area)
            .clear_values(&clear_values);
        unsafe { self.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE) }
    }

    fn end_render_pass(&self, cb: vk::CommandBuffer) {
        unsafe { self.cmd_end_render_pass(cb) }
    }

    fn bind_pipeline(&self, cb: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe { self.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline) }
    }

    fn set_viewport(&self, cb: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.cmd_set_viewport(cb, 0, &[viewport]) }
    }

    fn set_scissor(&self, cb: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.cmd_set_scissor(cb, 0, &[scissor]) }
    }

    fn bind_vertex_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[0]) }
    }

    fn bind_index_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.cmd_bind_index_buffer(cb, buffer, 0, vk::IndexType::UINT32) }
    }

    fn draw(&self, cb: vk::CommandBuffer, vertex_count: u32) {
        unsafe { self.cmd_draw(cb, vertex_count, 1, 0, 0) }
    }

    fn draw_indexed(&self, cb: vk::CommandBuffer, index_count: u32) {
        unsafe { self.cmd_draw_indexed(cb, index_count, 1, 0, 0, 0) }
    }

    fn copy_buffer(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::default().size(size);
        unsafe { self.cmd_copy_buffer(cb, src, dst, &[region]) }
    }
}

/// A GPU buffer bound for drawing, with its element count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundBuffer {
    pub buffer: vk::Buffer,
    pub count: u32,
}

/// Integer viewport rectangle in framebuffer pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ViewportRect {
    pub fn full(extent: vk::Extent2D) -> Self {
        Self { x: 0, y: 0, width: extent.width, height: extent.height }
    }

    pub fn to_vk(self) -> vk::Viewport {
        vk::Viewport {
            x: self.x as f32,
            y: self.y as f32,
            width: self.width as f32,
            height: self.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Scissor covering this rectangle, clipped to `extent`.
    pub fn scissor(self, extent: vk::Extent2D) -> vk::Rect2D {
        let x = self.x.clamp(0, extent.width as i32);
        let y = self.y.clamp(0, extent.height as i32);
        let right = (i64::from(self.x) + i64::from(self.width)).clamp(0, i64::from(extent.width));
        let bottom = (i64::from(self.y) + i64::from(self.height)).clamp(0, i64::from(extent.height));
        vk::Rect2D {
            offset: vk::Offset2D { x, y },
            extent: vk::Extent2D {
                width: (right - i64::from(x)).max(0) as u32,
                height: (bottom - i64::from(y)).max(0) as u32,
            },
        }
    }
}

/// Which input a bound buffer feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindSlot {
    Vertex,
    Index,
}

/// What is currently attached to a view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawState {
    pub vertex: Option<BoundBuffer>,
    pub index: Option<BoundBuffer>,
    pub viewport: Option<ViewportRect>,
}

impl DrawState {
    pub fn bind(&mut self, slot: BindSlot, buffer: BoundBuffer) {
        match slot {
            BindSlot::Vertex => self.vertex = Some(buffer),
            BindSlot::Index => self.index = Some(buffer),
        }
    }

    /// Forget `buffer` in whichever slot holds it.
    pub fn unbind(&mut self, buffer: vk::Buffer) {
        if self.vertex.map_or(false, |b| b.buffer == buffer) {
            self.vertex = None;
        }
        if self.index.map_or(false, |b| b.buffer == buffer) {
            self.index = None;
        }
    }
}

/// Render target and pipeline a frame is recorded against
#[derive(Debug, Clone, Copy)]
pub struct PassTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: Option<vk::Pipeline>,
    pub clear_color: [f32; 4],
}

/// The draw a recorded frame ended up issuing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    /// Clear only.
    None,
    Draw { vertex_count: u32 },
    Indexed { index_count: u32 },
}

/// Record one frame into `cb`: clear, then draw what `state` has bound.
pub fn record_frame<R: CommandRecorder + ?Sized>(
    recorder: &R,
    cb: vk::CommandBuffer,
    target: &PassTarget,
    state: &DrawState,
) -> VkResult<DrawCall> {
    recorder.begin(cb, false)?;

    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: target.extent,
    };
    recorder.begin_render_pass(cb, target.render_pass, target.framebuffer, area, target.clear_color);

    let mut call = DrawCall::None;
    if let (Some(pipeline), Some(vertex)) = (target.pipeline, state.vertex) {
        let viewport = state.viewport.unwrap_or_else(|| ViewportRect::full(target.extent));

        recorder.bind_pipeline(cb, pipeline);
        recorder.set_viewport(cb, viewport.to_vk());
        recorder.set_scissor(cb, viewport.scissor(target.extent));
        recorder.bind_vertex_buffer(cb, vertex.buffer);

        call = match state.index {
            Some(index) => {
                recorder.bind_index_buffer(cb, index.buffer);
                recorder.draw_indexed(cb, index.count);
                DrawCall::Indexed { index_count: index.count }
            }
            None => {
                recorder.draw(cb, vertex.count);
                DrawCall::Draw { vertex_count: vertex.count }
            }
        };
    }

    recorder.end_render_pass(cb);
    recorder.end(cb)?;
    Ok(call)
}

/// Record a one-shot staging -> destination copy.
pub fn record_copy<R: CommandRecorder + ?Sized>(
    recorder: &R,
    cb: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> VkResult<()> {
    recorder.begin(cb, true)?;
    recorder.copy_buffer(cb, src, dst, size);
    recorder.end(cb)
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;

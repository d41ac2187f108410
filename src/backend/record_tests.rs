//! Unit tests for per-frame command recording

use super::*;
use crate::backend::mock::MockDevice;
use ash::vk::Handle;

const EXTENT: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

fn target(pipeline: Option<vk::Pipeline>) -> PassTarget {
    PassTarget {
        render_pass: vk::RenderPass::from_raw(0x10),
        framebuffer: vk::Framebuffer::from_raw(0x20),
        extent: EXTENT,
        pipeline,
        clear_color: [0.0, 0.0, 0.0, 1.0],
    }
}

fn vertex_buffer() -> BoundBuffer {
    BoundBuffer { buffer: vk::Buffer::from_raw(0x100), count: 3 }
}

fn index_buffer() -> BoundBuffer {
    BoundBuffer { buffer: vk::Buffer::from_raw(0x200), count: 6 }
}

fn cb() -> vk::CommandBuffer {
    vk::CommandBuffer::from_raw(0x1)
}

// ============================================================================
// DRAW SELECTION
// ============================================================================

#[test]
fn test_non_indexed_draw_without_index_buffer() {
    let device = MockDevice::new();
    let state = DrawState { vertex: Some(vertex_buffer()), ..Default::default() };

    let call = record_frame(&device, cb(), &target(Some(vk::Pipeline::from_raw(0x30))), &state).unwrap();

    assert_eq!(call, DrawCall::Draw { vertex_count: 3 });
    assert_eq!(
        device.commands(),
        vec![
            "begin(one_time=false)",
            "begin_render_pass(800x600)",
            "bind_pipeline",
            "set_viewport(0,0,800,600)",
            "set_scissor(0,0,800,600)",
            "bind_vertex_buffer(0x100)",
            "draw(3)",
            "end_render_pass",
            "end",
        ]
    );
}

#[test]
fn test_indexed_draw_once_index_buffer_is_bound() {
    let device = MockDevice::new();
    let pipeline = Some(vk::Pipeline::from_raw(0x30));
    let mut state = DrawState { vertex: Some(vertex_buffer()), ..Default::default() };

    let before = record_frame(&device, cb(), &target(pipeline), &state).unwrap();
    assert_eq!(before, DrawCall::Draw { vertex_count: 3 });

    device.clear_commands();
    state.index = Some(index_buffer());
    let after = record_frame(&device, cb(), &target(pipeline), &state).unwrap();

    assert_eq!(after, DrawCall::Indexed { index_count: 6 });
    let commands = device.commands();
    assert!(commands.contains(&"bind_index_buffer(0x200)".to_string()));
    assert!(commands.contains(&"draw_indexed(6)".to_string()));
    assert!(!commands.iter().any(|c| c.starts_with("draw(")));
}

#[test]
fn test_clear_only_without_vertex_buffer() {
    let device = MockDevice::new();

    let call = record_frame(
        &device,
        cb(),
        &target(Some(vk::Pipeline::from_raw(0x30))),
        &DrawState::default(),
    )
    .unwrap();

    assert_eq!(call, DrawCall::None);
    assert_eq!(
        device.commands(),
        vec!["begin(one_time=false)", "begin_render_pass(800x600)", "end_render_pass", "end"]
    );
}

#[test]
fn test_clear_only_without_pipeline() {
    let device = MockDevice::new();
    let state = DrawState { vertex: Some(vertex_buffer()), ..Default::default() };

    let call = record_frame(&device, cb(), &target(None), &state).unwrap();

    assert_eq!(call, DrawCall::None);
    assert!(!device.commands().contains(&"bind_pipeline".to_string()));
}

// ============================================================================
// VIEWPORT
// ============================================================================

#[test]
fn test_custom_viewport_is_used_for_viewport_and_scissor() {
    let device = MockDevice::new();
    let state = DrawState {
        vertex: Some(vertex_buffer()),
        viewport: Some(ViewportRect { x: 10, y: 20, width: 300, height: 200 }),
        ..Default::default()
    };

    record_frame(&device, cb(), &target(Some(vk::Pipeline::from_raw(0x30))), &state).unwrap();

    let commands = device.commands();
    assert!(commands.contains(&"set_viewport(10,20,300,200)".to_string()));
    assert!(commands.contains(&"set_scissor(10,20,300,200)".to_string()));
}

#[test]
fn test_scissor_is_clipped_to_extent() {
    let rect = ViewportRect { x: 700, y: -50, width: 300, height: 200 };

    let scissor = rect.scissor(EXTENT);

    assert_eq!(scissor.offset.x, 700);
    assert_eq!(scissor.offset.y, 0);
    assert_eq!(scissor.extent.width, 100);
    assert_eq!(scissor.extent.height, 150);
}

#[test]
fn test_scissor_fully_outside_is_empty() {
    let rect = ViewportRect { x: 900, y: 0, width: 50, height: 50 };

    let scissor = rect.scissor(EXTENT);

    assert_eq!(scissor.extent.width, 0);
}

// ============================================================================
// COPY
// ============================================================================

#[test]
fn test_copy_is_one_time_submit() {
    let device = MockDevice::new();

    record_copy(&device, cb(), vk::Buffer::from_raw(0xA), vk::Buffer::from_raw(0xB), 64).unwrap();

    assert_eq!(
        device.commands(),
        vec!["begin(one_time=true)", "copy_buffer(0xa->0xb, 64)", "end"]
    );
}

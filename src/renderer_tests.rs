//! Unit tests for the renderer's per-tick scheduling, bind propagation
//! and frame accounting
//!
//! Views are modelled by their state alone; recording runs against the
//! mock device.

use super::*;
use crate::backend::mock::MockDevice;
use crate::backend::record::{self, DrawCall, PassTarget};
use crate::backend::view::state_after_submit;
use ash::vk::Handle;

struct TickView {
    state: ViewState,
    offscreen: bool,
    submitted_this_tick: bool,
    frames: u32,
}

impl TickView {
    fn window() -> Self {
        Self { state: ViewState::Ready, offscreen: false, submitted_this_tick: false, frames: 0 }
    }

    fn offscreen() -> Self {
        Self { offscreen: true, ..Self::window() }
    }
}

/// The `submit_views` loop with every frame succeeding.
fn submit_pass(views: &mut [TickView], only_pending: bool) {
    for view in views.iter_mut() {
        if !wants_submit(view.state, view.submitted_this_tick, only_pending) {
            continue;
        }
        view.submitted_this_tick = true;
        view.frames += 1;
        view.state = state_after_submit(view.offscreen);
    }
}

/// `present`: pending submits, then present every submitted view.
fn present_pass(views: &mut [TickView]) -> usize {
    submit_pass(views, true);
    let mut presented = 0;
    for view in views.iter_mut() {
        view.submitted_this_tick = false;
        if wants_present(view.state) {
            view.state = ViewState::Ready;
            presented += 1;
        }
    }
    presented
}

// ============================================================================
// TICK SCHEDULING
// ============================================================================

#[test]
fn test_offscreen_view_stays_ready_after_submit() {
    assert_eq!(state_after_submit(true), ViewState::Ready);
    assert_eq!(state_after_submit(false), ViewState::Submitted);
}

#[test]
fn test_present_does_not_resubmit_views_submitted_this_tick() {
    let mut views = [TickView::window(), TickView::offscreen()];

    submit_pass(&mut views, false);
    assert_eq!(views[0].state, ViewState::Submitted);
    assert_eq!(views[1].state, ViewState::Ready);

    let presented = present_pass(&mut views);

    assert_eq!(presented, 1);
    assert_eq!(views[0].frames, 1);
    assert_eq!(views[1].frames, 1);
    assert!(views.iter().all(|v| v.state == ViewState::Ready && !v.submitted_this_tick));
}

#[test]
fn test_present_alone_submits_then_presents() {
    let mut views = [TickView::window(), TickView::offscreen()];

    let presented = present_pass(&mut views);

    assert_eq!(presented, 1);
    assert_eq!(views[0].frames, 1);
    assert_eq!(views[1].frames, 1);
}

#[test]
fn test_next_tick_submits_again() {
    let mut views = [TickView::window(), TickView::offscreen()];

    present_pass(&mut views);
    present_pass(&mut views);

    assert_eq!(views[0].frames, 2);
    assert_eq!(views[1].frames, 2);
}

#[test]
fn test_explicit_submit_ignores_the_tick_flag() {
    assert!(wants_submit(ViewState::Ready, true, false));
    assert!(!wants_submit(ViewState::Ready, true, true));
    assert!(wants_submit(ViewState::Ready, false, true));
}

#[test]
fn test_views_outside_ready_are_never_submitted() {
    for state in [ViewState::Uninitialized, ViewState::Submitted, ViewState::Destroyed] {
        assert!(!wants_submit(state, false, false), "{:?}", state);
        assert!(!wants_submit(state, false, true), "{:?}", state);
    }
    assert!(!wants_present(ViewState::Ready));
    assert!(!wants_present(ViewState::Uninitialized));
}

// ============================================================================
// BIND PROPAGATION
// ============================================================================

fn vertices() -> BoundBuffer {
    BoundBuffer { buffer: vk::Buffer::from_raw(0x100), count: 4 }
}

fn indices() -> BoundBuffer {
    BoundBuffer { buffer: vk::Buffer::from_raw(0x200), count: 6 }
}

fn pass() -> PassTarget {
    PassTarget {
        render_pass: vk::RenderPass::from_raw(0x10),
        framebuffer: vk::Framebuffer::from_raw(0x20),
        extent: vk::Extent2D { width: 320, height: 240 },
        pipeline: Some(vk::Pipeline::from_raw(0x30)),
        clear_color: [0.0, 0.0, 0.0, 1.0],
    }
}

#[test]
fn test_index_buffer_reaches_every_view_and_switches_to_indexed() {
    let device = MockDevice::new();
    let cb = vk::CommandBuffer::from_raw(0x1);
    let mut draws = [DrawState::default(), DrawState::default()];
    bind_all(draws.iter_mut(), BindSlot::Vertex, vertices());

    assert_eq!(
        record::record_frame(&device, cb, &pass(), &draws[0]).unwrap(),
        DrawCall::Draw { vertex_count: 4 }
    );

    bind_all(draws.iter_mut(), BindSlot::Index, indices());

    for draw in &draws {
        device.clear_commands();
        let call = record::record_frame(&device, cb, &pass(), draw).unwrap();
        assert_eq!(call, DrawCall::Indexed { index_count: 6 });
        assert!(device.commands().contains(&"draw_indexed(6)".to_string()));
    }
}

#[test]
fn test_released_buffer_is_unbound_and_frame_falls_back() {
    let device = MockDevice::new();
    let mut draw = DrawState::default();
    bind_all(std::iter::once(&mut draw), BindSlot::Vertex, vertices());
    bind_all(std::iter::once(&mut draw), BindSlot::Index, indices());

    draw.unbind(indices().buffer);

    assert_eq!(draw.index, None);
    assert_eq!(
        record::record_frame(&device, vk::CommandBuffer::from_raw(0x1), &pass(), &draw).unwrap(),
        DrawCall::Draw { vertex_count: 4 }
    );
}

// ============================================================================
// FRAME ACCOUNTING
// ============================================================================

#[test]
fn test_each_outcome_lands_in_its_counter() {
    let mut stats = FrameStats::default();

    stats.count_submit(&Ok(FrameOutcome::Submitted(DrawCall::None)), 0);
    stats.count_submit(&Ok(FrameOutcome::Skipped), 0);
    stats.count_submit(&Err(anyhow::anyhow!("device lost")), 0);

    assert_eq!(stats.frames_submitted, 1);
    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.swapchain_recreations, 0);
}

#[test]
fn test_rebuild_counts_even_when_swapchain_is_suboptimal_again() {
    let mut stats = FrameStats::default();

    // Rebuilt, then the first acquire reported suboptimal: the view wants
    // another rebuild but this one still happened.
    stats.count_submit(&Ok(FrameOutcome::Submitted(DrawCall::Draw { vertex_count: 3 })), 1);
    // Rebuilt, then the acquire went out of date.
    stats.count_submit(&Ok(FrameOutcome::Skipped), 1);
    // Rebuilt, then the submit failed.
    stats.count_submit(&Err(anyhow::anyhow!("submit failed")), 1);

    assert_eq!(stats.swapchain_recreations, 3);
}

//! Integration tests for out-of-date recovery and window resizing.

mod common;

use ash::vk;

use common::{Event, extent, new_renderer};
use renderer_renderer::{FrameOutcome, RenderError};
use renderer_rhi::RhiError;
use renderer_rhi::backend::{GpuImage, Presenter};

#[test]
fn test_out_of_date_acquire_skips_submit_and_present() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));
    let backend = renderer.backend().clone();

    presenter.fail_next_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
    backend.clear_events();

    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Skipped);
    let events = backend.events();
    assert!(!events.iter().any(|e| matches!(e, Event::Submit { .. })));
    assert!(!events.iter().any(|e| matches!(e, Event::Present { .. })));
    assert!(!events.iter().any(|e| matches!(e, Event::ResetFence(_))));
    assert!(renderer.is_resize_requested());
    assert_eq!(renderer.frame_number(), 0);

    // While the request is pending nothing is acquired.
    backend.clear_events();
    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Skipped);
    assert!(backend.events().is_empty());

    assert!(renderer.resize_if_necessary().expect("resize"));
    assert!(!renderer.resize_if_necessary().expect("resize"));
    assert!(!renderer.is_resize_requested());

    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Presented);
    assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_resize_rebuilds_targets_at_new_extent() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));
    let backend = renderer.backend().clone();
    let set = renderer.draw_image_set().expect("draw image set");
    let old_draw = renderer.render_targets().draw().handle();

    renderer.set_window_extent(1280, 720);
    assert!(renderer.is_resize_requested());

    backend.clear_events();
    assert!(renderer.resize_if_necessary().expect("resize"));
    let events = backend.events();

    assert_eq!(events[0], Event::WaitIdle);
    assert!(events.contains(&Event::Recreate(extent(1280, 720))));
    assert!(events.contains(&Event::DestroyImage(old_draw)));
    assert_eq!(renderer.render_targets().extent(), extent(1280, 720));
    assert_eq!(renderer.render_targets().depth().extent_2d(), extent(1280, 720));
    assert_eq!(presenter.extent(), extent(1280, 720));
    assert_eq!(backend.live_images(), 2);

    // The background binding follows the new draw image.
    let new_view = renderer.render_targets().draw().view();
    assert!(events.contains(&Event::WriteDescriptor {
        set,
        binding: 0,
        ty: vk::DescriptorType::STORAGE_IMAGE,
        image_view: Some(new_view),
    }));

    backend.clear_events();
    renderer.draw(&mut ()).expect("draw");
    let new_draw = renderer.render_targets().draw().handle();
    assert!(backend.events().contains(&Event::Blit {
        src: new_draw,
        dst: presenter.images()[0],
        src_extent: extent(1280, 720),
        dst_extent: extent(1280, 720),
    }));

    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_targets_follow_extent_the_surface_accepts() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));
    presenter.set_surface_extent(extent(1000, 700));

    renderer.set_window_extent(1024, 768);
    assert!(renderer.resize_if_necessary().expect("resize"));

    assert_eq!(renderer.render_targets().extent(), extent(1000, 700));
    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_minimized_window_defers_resize() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));
    let backend = renderer.backend().clone();

    presenter.fail_next_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
    renderer.draw(&mut ()).expect("draw");
    renderer.set_window_extent(0, 0);

    backend.clear_events();
    assert!(!renderer.resize_if_necessary().expect("resize"));
    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Skipped);
    assert!(backend.events().is_empty());
    assert!(renderer.is_resize_requested());

    renderer.set_window_extent(640, 480);
    assert!(renderer.resize_if_necessary().expect("resize"));
    assert_eq!(renderer.render_targets().extent(), extent(640, 480));

    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_zero_surface_extent_keeps_swapchain_and_targets() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));
    let backend = renderer.backend().clone();
    let images = presenter.images();
    let draw = renderer.render_targets().draw().handle();

    // The host still reports a size while the surface has none.
    presenter.set_surface_extent(extent(0, 0));
    renderer.set_window_extent(1024, 768);

    backend.clear_events();
    assert!(!renderer.resize_if_necessary().expect("resize"));
    assert!(renderer.is_resize_requested());
    assert_eq!(presenter.images(), images);
    assert_eq!(presenter.extent(), extent(800, 600));
    assert_eq!(renderer.render_targets().draw().handle(), draw);
    assert!(!backend.events().iter().any(|e| matches!(
        e,
        Event::Recreate(_) | Event::DestroyImage(_) | Event::CreateImage(..)
    )));

    presenter.set_surface_extent(extent(1024, 768));
    assert!(renderer.resize_if_necessary().expect("resize"));
    assert_eq!(renderer.render_targets().extent(), extent(1024, 768));

    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_restoring_same_size_resumes_without_resize() {
    let (mut renderer, _presenter) = new_renderer(extent(800, 600));

    renderer.set_window_extent(0, 0);
    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Skipped);

    renderer.set_window_extent(800, 600);
    assert!(!renderer.is_resize_requested());
    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Presented);

    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_out_of_date_present_requests_resize_after_submit() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));
    let backend = renderer.backend().clone();

    presenter.script_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Skipped);

    assert_eq!(backend.submissions(), 1);
    assert_eq!(renderer.frame_number(), 1);
    assert!(renderer.is_resize_requested());
    assert!(renderer.resize_if_necessary().expect("resize"));

    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_suboptimal_present_is_not_a_resize() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));

    presenter.script_present(Ok(true));
    assert_eq!(renderer.draw(&mut ()).expect("draw"), FrameOutcome::Presented);
    assert!(!renderer.is_resize_requested());

    renderer.shutdown().expect("shutdown");
}

#[test]
fn test_other_acquire_failures_are_fatal() {
    let (mut renderer, presenter) = new_renderer(extent(800, 600));

    presenter.fail_next_acquire(vk::Result::ERROR_DEVICE_LOST);
    let err = renderer.draw(&mut ()).unwrap_err();

    assert!(matches!(
        err,
        RenderError::Rhi(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
    ));
    assert!(err.is_fatal());
    assert!(!renderer.is_resize_requested());
}

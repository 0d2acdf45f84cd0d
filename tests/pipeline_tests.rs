//! Pipeline Manager Tests
//!
//! Tests for:
//! - Descriptor keys: label-insensitive, state-sensitive
//! - Cache hits/misses, use counts, LRU eviction of exactly one entry
//! - clear() and orphaned-handle draining
//! - Compile failures surfacing as PipelineError without caching
//! - Independent render/compute key spaces and stats

use kiln_gpu::driver::mock::MockDriver;
use kiln_gpu::{
    BlendMode, ColorTarget, ComputePipelineDesc, DeviceManager, GpuError, GpuSettings,
    MultisampleState, PipelineCacheConfig, PipelineManager, PrimitiveState, RenderPipelineDesc,
    TextureFormat,
};

fn ready_manager() -> DeviceManager<MockDriver> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut m = DeviceManager::new(MockDriver::new(), GpuSettings::default());
    pollster::block_on(m.initialize()).expect("mock initialize");
    m
}

fn render_desc(label: &str, shader: &str) -> RenderPipelineDesc {
    RenderPipelineDesc {
        label: Some(label.to_string()),
        shader_source: shader.to_string(),
        vertex_entry: "vs_main".to_string(),
        fragment_entry: Some("fs_main".to_string()),
        vertex_buffers: Vec::new(),
        color_targets: vec![ColorTarget {
            format: TextureFormat::Bgra8UnormSrgb,
            blend: BlendMode::Replace,
        }],
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
    }
}

fn compute_desc(label: &str, entry: &str) -> ComputePipelineDesc {
    ComputePipelineDesc {
        label: Some(label.to_string()),
        shader_source: "@compute fn main() {}".to_string(),
        entry_point: entry.to_string(),
    }
}

// ============================================================================
// Caching
// ============================================================================

#[test]
fn descriptors_differing_only_in_label_share_one_pipeline() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    let a = pollster::block_on(
        pipelines.get_render_pipeline(&mut ctx, &render_desc("first", "shader-a")),
    )
    .unwrap();
    let b = pollster::block_on(
        pipelines.get_render_pipeline(&mut ctx, &render_desc("second name", "shader-a")),
    )
    .unwrap();

    assert_eq!(a, b);
    let stats = pipelines.render_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn different_state_compiles_a_distinct_pipeline() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    let base = render_desc("p", "shader-a");
    let mut blended = base.clone();
    blended.color_targets[0].blend = BlendMode::AlphaBlend;

    let a = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &base)).unwrap();
    let b = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &blended)).unwrap();

    assert_ne!(a, b);
    assert_eq!(pipelines.render_stats().misses, 2);
}

#[test]
fn exceeding_capacity_evicts_exactly_the_least_recently_used() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig {
        render_capacity: 2,
        compute_capacity: 2,
    });

    let desc_a = render_desc("a", "shader-a");
    let desc_b = render_desc("b", "shader-b");
    let desc_c = render_desc("c", "shader-c");

    // Use order A, B; C's insertion must evict A.
    let a = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_a)).unwrap();
    let _b = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_b)).unwrap();
    let _c = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_c)).unwrap();

    let stats = pipelines.render_stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.entries, 2);

    let (orphaned_render, _) = pipelines.drain_orphaned();
    assert_eq!(orphaned_render, vec![a], "A was the LRU entry");

    // A is gone: asking again recompiles.
    let a2 = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_a)).unwrap();
    assert_ne!(a, a2);
}

#[test]
fn a_hit_refreshes_recency_for_eviction() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig {
        render_capacity: 2,
        compute_capacity: 2,
    });

    let desc_a = render_desc("a", "shader-a");
    let desc_b = render_desc("b", "shader-b");
    let desc_c = render_desc("c", "shader-c");

    let _a = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_a)).unwrap();
    let b = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_b)).unwrap();
    // Touch A, making B the least recently used.
    let _a = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_a)).unwrap();
    let _c = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc_c)).unwrap();

    let (orphaned_render, _) = pipelines.drain_orphaned();
    assert_eq!(orphaned_render, vec![b]);
}

#[test]
fn clear_drops_all_entries_and_orphans_their_handles() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &render_desc("a", "shader-a")))
        .unwrap();
    pollster::block_on(pipelines.get_compute_pipeline(&mut ctx, &compute_desc("k", "main")))
        .unwrap();

    pipelines.clear();
    assert_eq!(pipelines.render_len(), 0);
    assert_eq!(pipelines.compute_len(), 0);

    let (render_orphans, compute_orphans) = pipelines.drain_orphaned();
    assert_eq!(render_orphans.len(), 1);
    assert_eq!(compute_orphans.len(), 1);

    // Disposal is the caller's job; hand the handles back to the driver.
    for id in render_orphans {
        ctx.driver_destroy_render_pipeline(id);
    }
    for id in compute_orphans {
        ctx.driver_destroy_compute_pipeline(id);
    }
    drop(ctx);
    assert_eq!(m.driver().render_pipeline_count(), 0);
    assert_eq!(m.driver().compute_pipeline_count(), 0);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn compile_failure_surfaces_and_is_not_cached() {
    let mut m = ready_manager();
    m.driver_mut().fail_next_compile("wgsl parse error at 1:1");
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    let desc = render_desc("broken", "shader-x");
    let err = pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc)).unwrap_err();
    assert!(matches!(err, GpuError::PipelineCompileFailed { .. }));
    assert_eq!(pipelines.render_len(), 0);

    // The failure was not cached: a retry compiles successfully.
    pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc)).unwrap();
    assert_eq!(pipelines.render_len(), 1);
}

// ============================================================================
// Statistics & Inspection
// ============================================================================

#[test]
fn render_and_compute_stats_are_independent() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &render_desc("r", "shader-a")))
        .unwrap();
    pollster::block_on(pipelines.get_compute_pipeline(&mut ctx, &compute_desc("k1", "main")))
        .unwrap();
    pollster::block_on(pipelines.get_compute_pipeline(&mut ctx, &compute_desc("k2", "main")))
        .unwrap();

    assert_eq!(pipelines.render_stats().misses, 1);
    // Same source and entry point: the second compute request is a hit.
    assert_eq!(pipelines.compute_stats().misses, 1);
    assert_eq!(pipelines.compute_stats().hits, 1);
}

#[test]
fn average_compile_time_reflects_recorded_misses() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    let stats = pipelines.render_stats();
    assert_eq!(stats.average_compile_time(), std::time::Duration::ZERO);

    let desc = render_desc("a", "shader-a");
    pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &desc)).unwrap();
    assert!(pipelines.render_compile_time(&desc).is_some());
}

#[test]
fn hottest_render_orders_by_use_count() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    let cold = render_desc("cold", "shader-a");
    let hot = render_desc("hot", "shader-b");
    pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &cold)).unwrap();
    for _ in 0..3 {
        pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &hot)).unwrap();
    }

    let hottest = pipelines.hottest_render(1);
    assert_eq!(hottest.len(), 1);
    assert_eq!(hottest[0].0.as_deref(), Some("hot"));
    assert_eq!(hottest[0].1, 2);
}

#[test]
fn pipeline_compilations_update_device_stats() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let mut pipelines = PipelineManager::new(PipelineCacheConfig::default());

    pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &render_desc("a", "shader-a")))
        .unwrap();
    pollster::block_on(pipelines.get_render_pipeline(&mut ctx, &render_desc("b", "shader-a")))
        .unwrap();
    drop(ctx);

    // The second call was a hit, so only one compilation is tracked.
    assert_eq!(m.stats().pipelines_created, 1);
}

//! Frame pipelining across N frames in flight.
//!
//! Each slot walks through the same protocol every time it is used:
//!
//! ```text
//! Idle --wait_for_slot--> Idle --acquire--> Acquiring --record--> Recording
//!      --submit--> Submitted --present--> Presenting --> Idle
//! ```
//!
//! The slot's completion fence is the only backpressure: `wait_for_slot`
//! blocks until the work submitted from that slot N frames ago has executed.
//! An out-of-date surface during acquire or present skips the frame and
//! raises the rebuild flag instead of failing.
//!
//! The GPU side sits behind [`FrameBackend`] so the state machine can run
//! against a scripted backend in tests.

use std::sync::Arc;

use ash::vk;
use framegraph_rhi::command::CommandPool;
use framegraph_rhi::device::Device;
use framegraph_rhi::swapchain::Swapchain;
use framegraph_rhi::sync::FrameSync;
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};

/// Protocol state of a frame-in-flight slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    /// An image has been acquired for the slot.
    Acquiring,
    /// The slot's command buffer has been recorded.
    Recording,
    Submitted,
    Presenting,
}

/// What the record closure gets to work with.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext {
    pub slot: usize,
    pub image_index: u32,
    pub frame_number: u64,
    pub command_buffer: vk::CommandBuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        frame: u64,
        image_index: u32,
        suboptimal: bool,
    },
    /// The surface went out of date; the caller should rebuild.
    Skipped,
}

/// GPU operations the driver sequences.
///
/// Out-of-date surfaces are reported as [`RenderError::SurfaceOutOfDate`];
/// every other failure as [`RenderError::Submission`].
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;

    /// Blocks until the slot's completion fence is signaled.
    fn wait_fence(&mut self, slot: usize) -> RenderResult<()>;

    fn reset_fence(&mut self, slot: usize) -> RenderResult<()>;

    /// Returns `(image_index, suboptimal)`, signalling the slot's
    /// image-available semaphore.
    fn acquire(&mut self, slot: usize) -> RenderResult<(u32, bool)>;

    /// Resets and begins the slot's command buffer.
    fn begin_commands(&mut self, slot: usize) -> RenderResult<vk::CommandBuffer>;

    fn end_commands(&mut self, slot: usize) -> RenderResult<()>;

    /// Submits the slot's command buffer, waiting on image-available and
    /// signalling work-finished and the completion fence.
    fn submit(&mut self, slot: usize) -> RenderResult<()>;

    /// Presents `image_index` after work-finished. Returns `true` when
    /// suboptimal.
    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<bool>;

    /// Hands back an image acquired for a frame that was never recorded.
    ///
    /// Submits no commands, but waits on image-available and signals
    /// work-finished and the completion fence, then presents `image_index`.
    /// The fence has been reset by the driver.
    fn abandon(&mut self, slot: usize, image_index: u32) -> RenderResult<()>;
}

/// Drives the per-frame protocol over a [`FrameBackend`].
pub struct FrameDriver<B: FrameBackend> {
    backend: B,
    states: Vec<FrameState>,
    image_indices: Vec<Option<u32>>,
    frame_number: u64,
    needs_rebuild: bool,
}

impl<B: FrameBackend> FrameDriver<B> {
    pub fn new(backend: B) -> RenderResult<Self> {
        let frames_in_flight = backend.frames_in_flight();
        if frames_in_flight == 0 {
            return Err(RenderError::config(
                "At least one frame in flight is required",
            ));
        }

        info!("Frame driver created with {} frames in flight", frames_in_flight);

        Ok(Self {
            backend,
            states: vec![FrameState::Idle; frames_in_flight],
            image_indices: vec![None; frames_in_flight],
            frame_number: 0,
            needs_rebuild: false,
        })
    }

    fn expect_state(&self, slot: usize, expected: FrameState, call: &str) -> RenderResult<()> {
        let state = self.states.get(slot).copied().ok_or_else(|| {
            RenderError::state(format!(
                "Frame slot {} out of range ({} in flight)",
                slot,
                self.states.len()
            ))
        })?;
        if state != expected {
            return Err(RenderError::state(format!(
                "{} on slot {} requires {:?}, slot is {:?}",
                call, slot, expected, state
            )));
        }
        Ok(())
    }

    /// Blocks until no work previously submitted from `slot` is pending.
    pub fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.expect_state(slot, FrameState::Idle, "wait_for_slot")?;
        self.backend.wait_fence(slot)
    }

    /// Acquires the next image for `slot`.
    ///
    /// An out-of-date surface returns [`RenderError::SurfaceOutOfDate`],
    /// raises the rebuild flag and leaves the slot idle with its fence
    /// untouched.
    pub fn acquire(&mut self, slot: usize) -> RenderResult<(u32, bool)> {
        self.expect_state(slot, FrameState::Idle, "acquire")?;

        match self.backend.acquire(slot) {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    self.needs_rebuild = true;
                }
                self.states[slot] = FrameState::Acquiring;
                self.image_indices[slot] = Some(image_index);
                Ok((image_index, suboptimal))
            }
            Err(err) => {
                if matches!(err, RenderError::SurfaceOutOfDate) {
                    self.needs_rebuild = true;
                }
                Err(err)
            }
        }
    }

    /// Records the slot's command buffer through `record`.
    pub fn record<F>(&mut self, slot: usize, record: F) -> RenderResult<()>
    where
        F: FnOnce(&FrameContext) -> RenderResult<()>,
    {
        self.expect_state(slot, FrameState::Acquiring, "record")?;
        let image_index = self.image_indices[slot].ok_or_else(|| {
            RenderError::state(format!("Slot {} holds no acquired image", slot))
        })?;

        let command_buffer = self.backend.begin_commands(slot)?;
        let context = FrameContext {
            slot,
            image_index,
            frame_number: self.frame_number,
            command_buffer,
        };
        record(&context)?;
        self.backend.end_commands(slot)?;

        self.states[slot] = FrameState::Recording;
        Ok(())
    }

    /// Resets the slot's fence and submits its command buffer.
    pub fn submit(&mut self, slot: usize) -> RenderResult<()> {
        self.expect_state(slot, FrameState::Recording, "submit")?;
        self.backend.reset_fence(slot)?;
        self.backend.submit(slot)?;
        self.states[slot] = FrameState::Submitted;
        Ok(())
    }

    /// Presents the slot's image. Returns whether the surface is suboptimal.
    pub fn present(&mut self, slot: usize) -> RenderResult<bool> {
        self.expect_state(slot, FrameState::Submitted, "present")?;
        let image_index = self.image_indices[slot].ok_or_else(|| {
            RenderError::state(format!("Slot {} holds no acquired image", slot))
        })?;

        self.states[slot] = FrameState::Presenting;
        let result = self.backend.present(slot, image_index);
        self.states[slot] = FrameState::Idle;
        self.image_indices[slot] = None;

        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    self.needs_rebuild = true;
                }
                Ok(suboptimal)
            }
            Err(err) => {
                if matches!(err, RenderError::SurfaceOutOfDate) {
                    self.needs_rebuild = true;
                }
                Err(err)
            }
        }
    }

    /// Runs one complete frame on slot `frame_number % N`.
    pub fn run_frame<F>(&mut self, record: F) -> RenderResult<FrameOutcome>
    where
        F: FnOnce(&FrameContext) -> RenderResult<()>,
    {
        let slot = self.current_slot();
        self.wait_for_slot(slot)?;

        let image_index = match self.acquire(slot) {
            Ok((image_index, _)) => image_index,
            Err(RenderError::SurfaceOutOfDate) => {
                warn!("Surface out of date on acquire, skipping frame {}", self.frame_number);
                return Ok(FrameOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = self.record(slot, record) {
            self.release_acquired(slot, image_index);
            return Err(err);
        }
        self.submit(slot)?;

        let frame = self.frame_number;
        self.frame_number += 1;

        match self.present(slot) {
            Ok(suboptimal) => Ok(FrameOutcome::Presented {
                frame,
                image_index,
                suboptimal,
            }),
            Err(RenderError::SurfaceOutOfDate) => {
                warn!("Surface out of date on present of frame {}", frame);
                Ok(FrameOutcome::Skipped)
            }
            Err(err) => Err(err),
        }
    }

    /// Returns a slot whose recording failed to idle.
    ///
    /// The acquired image still holds a signaled image-available semaphore,
    /// so it is handed back through [`FrameBackend::abandon`]. If that fails
    /// too the fence may stay unsignaled and the surface is flagged for
    /// rebuild.
    fn release_acquired(&mut self, slot: usize, image_index: u32) {
        self.states[slot] = FrameState::Idle;
        self.image_indices[slot] = None;

        let released = self
            .backend
            .reset_fence(slot)
            .and_then(|()| self.backend.abandon(slot, image_index));
        match released {
            Ok(()) => debug!("Image {} of slot {} handed back unrendered", image_index, slot),
            Err(err) => {
                warn!("Cannot hand back image {} of slot {}: {}", image_index, slot, err);
                self.needs_rebuild = true;
            }
        }
    }

    /// Waits for every slot's fence.
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        for slot in 0..self.states.len() {
            self.backend.wait_fence(slot)?;
        }
        debug!("All {} frame slots idle", self.states.len());
        Ok(())
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_number % self.states.len() as u64) as usize
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, slot: usize) -> Option<FrameState> {
        self.states.get(slot).copied()
    }

    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn clear_rebuild_flag(&mut self) {
        self.needs_rebuild = false;
    }

    /// Flags the surface for rebuild after a window resize.
    pub fn set_resized(&mut self) {
        self.needs_rebuild = true;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

fn submission(err: impl std::fmt::Display) -> RenderError {
    RenderError::Submission(err.to_string())
}

fn surface_error(result: vk::Result) -> RenderError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SurfaceOutOfDate,
        other => submission(other),
    }
}

/// [`FrameBackend`] over a swapchain and per-slot sync objects.
///
/// Fields drop in declaration order: sync objects, command pool, swapchain.
pub struct VulkanFrameBackend {
    syncs: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: CommandPool,
    swapchain: Swapchain,
    device: Arc<Device>,
}

impl VulkanFrameBackend {
    pub fn new(device: Arc<Device>, swapchain: Swapchain, frames_in_flight: usize) -> RenderResult<Self> {
        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or_else(|| RenderError::config("Device has no graphics queue family"))?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let command_buffers = command_pool.allocate_command_buffers(frames_in_flight as u32)?;

        let mut syncs = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            syncs.push(FrameSync::new(device.clone())?);
        }

        info!(
            "Frame backend ready: {} slot(s), {} swapchain image(s)",
            frames_in_flight,
            swapchain.image_count()
        );

        Ok(Self {
            syncs,
            command_buffers,
            command_pool,
            swapchain,
            device,
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Only valid while every slot is idle.
    pub fn swapchain_mut(&mut self) -> &mut Swapchain {
        &mut self.swapchain
    }

    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    fn sync(&self, slot: usize) -> RenderResult<&FrameSync> {
        self.syncs
            .get(slot)
            .ok_or_else(|| RenderError::state(format!("Frame slot {} out of range", slot)))
    }

    fn command_buffer(&self, slot: usize) -> RenderResult<vk::CommandBuffer> {
        self.command_buffers
            .get(slot)
            .copied()
            .ok_or_else(|| RenderError::state(format!("Frame slot {} out of range", slot)))
    }
}

impl FrameBackend for VulkanFrameBackend {
    fn frames_in_flight(&self) -> usize {
        self.syncs.len()
    }

    fn wait_fence(&mut self, slot: usize) -> RenderResult<()> {
        self.sync(slot)?
            .in_flight_fence()
            .wait(u64::MAX)
            .map_err(submission)
    }

    fn reset_fence(&mut self, slot: usize) -> RenderResult<()> {
        self.sync(slot)?.in_flight_fence().reset().map_err(submission)
    }

    fn acquire(&mut self, slot: usize) -> RenderResult<(u32, bool)> {
        let semaphore = self.sync(slot)?.image_available().handle();
        self.swapchain
            .acquire_next_image(semaphore)
            .map_err(surface_error)
    }

    fn begin_commands(&mut self, slot: usize) -> RenderResult<vk::CommandBuffer> {
        let cmd = self.command_buffer(slot)?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            let device = self.device.handle();
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(submission)?;
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(submission)?;
        }
        Ok(cmd)
    }

    fn end_commands(&mut self, slot: usize) -> RenderResult<()> {
        let cmd = self.command_buffer(slot)?;
        unsafe { self.device.handle().end_command_buffer(cmd) }.map_err(submission)
    }

    fn submit(&mut self, slot: usize) -> RenderResult<()> {
        let sync = self.sync(slot)?;
        let wait_semaphores = [sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.work_finished().handle()];
        let command_buffers = [self.command_buffer(slot)?];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was recorded by begin/end_commands and
        // the fence was reset by the driver right before this call.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], sync.in_flight_fence().handle())
                .map_err(submission)
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<bool> {
        let wait = self.sync(slot)?.work_finished().handle();
        self.swapchain
            .present(self.device.present_queue(), image_index, wait)
            .map_err(surface_error)
    }

    fn abandon(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
        let sync = self.sync(slot)?;
        let wait_semaphores = [sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.work_finished().handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: an empty batch only moves the semaphores and the fence,
        // which the driver reset right before this call.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], sync.in_flight_fence().handle())
                .map_err(submission)?;
        }
        self.present(slot, image_index).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that simulates fences and a surface that can go out of date.
    #[derive(Default)]
    struct ScriptedBackend {
        frames: usize,
        fail_abandon: bool,
        image_count: u32,
        next_image: u32,
        signaled: Vec<bool>,
        pending: Vec<bool>,
        out_of_date_acquires: Vec<usize>,
        out_of_date_presents: Vec<usize>,
        acquire_calls: usize,
        present_calls: usize,
        log: Vec<String>,
    }

    impl ScriptedBackend {
        fn new(frames: usize, image_count: u32) -> Self {
            Self {
                frames,
                image_count,
                signaled: vec![true; frames],
                pending: vec![false; frames],
                ..Default::default()
            }
        }
    }

    impl FrameBackend for ScriptedBackend {
        fn frames_in_flight(&self) -> usize {
            self.frames
        }

        fn wait_fence(&mut self, slot: usize) -> RenderResult<()> {
            self.log.push(format!("wait {}", slot));
            if self.pending[slot] {
                self.pending[slot] = false;
                self.signaled[slot] = true;
            }
            if !self.signaled[slot] {
                return Err(RenderError::Submission(format!("deadlock on slot {}", slot)));
            }
            Ok(())
        }

        fn reset_fence(&mut self, slot: usize) -> RenderResult<()> {
            self.log.push(format!("reset {}", slot));
            self.signaled[slot] = false;
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> RenderResult<(u32, bool)> {
            let call = self.acquire_calls;
            self.acquire_calls += 1;
            self.log.push(format!("acquire {}", slot));
            if self.out_of_date_acquires.contains(&call) {
                return Err(RenderError::SurfaceOutOfDate);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok((image, false))
        }

        fn begin_commands(&mut self, slot: usize) -> RenderResult<vk::CommandBuffer> {
            self.log.push(format!("begin {}", slot));
            Ok(vk::CommandBuffer::null())
        }

        fn end_commands(&mut self, slot: usize) -> RenderResult<()> {
            self.log.push(format!("end {}", slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RenderResult<()> {
            self.log.push(format!("submit {}", slot));
            self.pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<bool> {
            let call = self.present_calls;
            self.present_calls += 1;
            self.log.push(format!("present {} {}", slot, image_index));
            if self.out_of_date_presents.contains(&call) {
                return Err(RenderError::SurfaceOutOfDate);
            }
            Ok(false)
        }

        fn abandon(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
            self.log.push(format!("abandon {} {}", slot, image_index));
            if self.fail_abandon {
                return Err(RenderError::Submission("device lost".to_string()));
            }
            self.pending[slot] = true;
            Ok(())
        }
    }

    #[test]
    fn test_zero_frames_rejected() {
        let result = FrameDriver::new(ScriptedBackend::new(0, 3));
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_three_frames_present_in_order() {
        let mut driver = FrameDriver::new(ScriptedBackend::new(2, 3)).unwrap();
        let mut recorded = Vec::new();

        for expected in 0..3u64 {
            let outcome = driver
                .run_frame(|ctx| {
                    recorded.push((ctx.slot, ctx.frame_number));
                    Ok(())
                })
                .unwrap();
            match outcome {
                FrameOutcome::Presented {
                    frame,
                    image_index,
                    suboptimal,
                } => {
                    assert_eq!(frame, expected);
                    assert_eq!(image_index, expected as u32);
                    assert!(!suboptimal);
                }
                FrameOutcome::Skipped => panic!("frame {} skipped", expected),
            }
        }

        assert_eq!(driver.frame_number(), 3);
        assert_eq!(recorded, vec![(0, 0), (1, 1), (0, 2)]);
        assert!(!driver.needs_rebuild());
        assert_eq!(
            &driver.backend().log[..7],
            &[
                "wait 0", "acquire 0", "begin 0", "end 0", "reset 0", "submit 0", "present 0 0"
            ]
        );
    }

    #[test]
    fn test_wait_for_slot_leaves_nothing_pending() {
        let mut driver = FrameDriver::new(ScriptedBackend::new(3, 3)).unwrap();
        for _ in 0..3 {
            driver.run_frame(|_| Ok(())).unwrap();
        }
        assert!(driver.backend().pending.iter().all(|&p| p));

        for slot in 0..3 {
            driver.wait_for_slot(slot).unwrap();
            assert!(!driver.backend().pending[slot]);
            assert!(driver.backend().signaled[slot]);
            // Waiting again is a no-op.
            driver.wait_for_slot(slot).unwrap();
        }
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame() {
        let mut backend = ScriptedBackend::new(2, 3);
        backend.out_of_date_acquires = vec![1];
        let mut driver = FrameDriver::new(backend).unwrap();

        driver.run_frame(|_| Ok(())).unwrap();
        let outcome = driver
            .run_frame(|_| panic!("skipped frames are not recorded"))
            .unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(driver.needs_rebuild());
        assert_eq!(driver.frame_number(), 1);
        assert_eq!(driver.state(1), Some(FrameState::Idle));
        assert!(driver.backend().signaled[1]);

        driver.clear_rebuild_flag();
        let outcome = driver.run_frame(|_| Ok(())).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { frame: 1, .. }));
        assert!(!driver.needs_rebuild());
    }

    #[test]
    fn test_out_of_date_present_advances_frame() {
        let mut backend = ScriptedBackend::new(2, 3);
        backend.out_of_date_presents = vec![0];
        let mut driver = FrameDriver::new(backend).unwrap();

        let outcome = driver.run_frame(|_| Ok(())).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(driver.needs_rebuild());
        assert_eq!(driver.frame_number(), 1);
        assert_eq!(driver.state(0), Some(FrameState::Idle));

        // The submitted work still completes, so the slot is reusable.
        driver.run_frame(|_| Ok(())).unwrap();
        driver.run_frame(|_| Ok(())).unwrap();
        assert_eq!(driver.frame_number(), 3);
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut driver = FrameDriver::new(ScriptedBackend::new(2, 3)).unwrap();

        assert!(matches!(driver.submit(0), Err(RenderError::State(_))));
        assert!(matches!(driver.present(0), Err(RenderError::State(_))));
        assert!(matches!(
            driver.record(0, |_| Ok(())),
            Err(RenderError::State(_))
        ));
        assert!(matches!(driver.wait_for_slot(5), Err(RenderError::State(_))));

        driver.wait_for_slot(0).unwrap();
        driver.acquire(0).unwrap();
        assert_eq!(driver.state(0), Some(FrameState::Acquiring));
        assert!(matches!(driver.acquire(0), Err(RenderError::State(_))));
        assert!(matches!(driver.wait_for_slot(0), Err(RenderError::State(_))));

        driver.record(0, |_| Ok(())).unwrap();
        driver.submit(0).unwrap();
        assert_eq!(driver.state(0), Some(FrameState::Submitted));
        assert!(!driver.present(0).unwrap());
        assert_eq!(driver.state(0), Some(FrameState::Idle));
    }

    #[test]
    fn test_record_error_hands_image_back() {
        let mut driver = FrameDriver::new(ScriptedBackend::new(2, 3)).unwrap();
        let result = driver.run_frame(|_| Err(RenderError::state("stage out of order")));

        assert!(matches!(result, Err(RenderError::State(_))));
        assert_eq!(driver.state(0), Some(FrameState::Idle));
        assert_eq!(driver.frame_number(), 0);
        assert!(!driver.needs_rebuild());
        assert_eq!(
            &driver.backend().log[..4],
            &["wait 0", "acquire 0", "begin 0", "reset 0"]
        );
        assert_eq!(driver.backend().log[4], "abandon 0 0");

        // The empty submission signals the fence, so the slot is reusable.
        driver.wait_for_slot(0).unwrap();
        let outcome = driver.run_frame(|_| Ok(())).unwrap();
        assert!(matches!(
            outcome,
            FrameOutcome::Presented {
                frame: 0,
                image_index: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_hand_back_flags_rebuild() {
        let mut backend = ScriptedBackend::new(2, 3);
        backend.fail_abandon = true;
        let mut driver = FrameDriver::new(backend).unwrap();

        let result = driver.run_frame(|_| Err(RenderError::state("stage out of order")));
        assert!(matches!(result, Err(RenderError::State(_))));
        assert_eq!(driver.state(0), Some(FrameState::Idle));
        assert!(driver.needs_rebuild());
    }

    #[test]
    fn test_wait_idle_and_resize_flag() {
        let mut driver = FrameDriver::new(ScriptedBackend::new(2, 2)).unwrap();
        driver.run_frame(|_| Ok(())).unwrap();
        driver.run_frame(|_| Ok(())).unwrap();
        driver.wait_idle().unwrap();
        assert!(driver.backend().pending.iter().all(|&p| !p));

        driver.set_resized();
        assert!(driver.needs_rebuild());
        driver.clear_rebuild_flag();
        assert!(!driver.needs_rebuild());
        assert_eq!(driver.frames_in_flight(), 2);
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Renderer bring-up as an explicit, ordered list of named steps.
//!
//! The plan only knows names and ordering. What a step does is up to the
//! executor handed to [`InitPlan::run`], which lets tests run any prefix of the
//! sequence or inject a failure at any step.

use crate::error::VkError;
use prism_render::RenderFeatures;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InitStep {
    Instance,
    DebugMessenger,
    Surface,
    Adapter,
    LogicalDevice,
    Swapchain,
    RenderPass,
    DescriptorLayout,
    Pipeline,
    CommandPool,
    DepthResources,
    Framebuffers,
    TextureImage,
    TextureSampler,
    VertexBuffer,
    IndexBuffer,
    UniformBuffers,
    DescriptorPool,
    DescriptorSets,
    CommandBuffers,
    SyncObjects,
}

impl InitStep {
    pub const ALL: [InitStep; 21] = [
        InitStep::Instance,
        InitStep::DebugMessenger,
        InitStep::Surface,
        InitStep::Adapter,
        InitStep::LogicalDevice,
        InitStep::Swapchain,
        InitStep::RenderPass,
        InitStep::DescriptorLayout,
        InitStep::Pipeline,
        InitStep::CommandPool,
        InitStep::DepthResources,
        InitStep::Framebuffers,
        InitStep::TextureImage,
        InitStep::TextureSampler,
        InitStep::VertexBuffer,
        InitStep::IndexBuffer,
        InitStep::UniformBuffers,
        InitStep::DescriptorPool,
        InitStep::DescriptorSets,
        InitStep::CommandBuffers,
        InitStep::SyncObjects,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            InitStep::Instance => "Instance",
            InitStep::DebugMessenger => "DebugMessenger",
            InitStep::Surface => "Surface",
            InitStep::Adapter => "Adapter",
            InitStep::LogicalDevice => "LogicalDevice",
            InitStep::Swapchain => "Swapchain",
            InitStep::RenderPass => "RenderPass",
            InitStep::DescriptorLayout => "DescriptorLayout",
            InitStep::Pipeline => "Pipeline",
            InitStep::CommandPool => "CommandPool",
            InitStep::DepthResources => "DepthResources",
            InitStep::Framebuffers => "Framebuffers",
            InitStep::TextureImage => "TextureImage",
            InitStep::TextureSampler => "TextureSampler",
            InitStep::VertexBuffer => "VertexBuffer",
            InitStep::IndexBuffer => "IndexBuffer",
            InitStep::UniformBuffers => "UniformBuffers",
            InitStep::DescriptorPool => "DescriptorPool",
            InitStep::DescriptorSets => "DescriptorSets",
            InitStep::CommandBuffers => "CommandBuffers",
            InitStep::SyncObjects => "SyncObjects",
        }
    }

    /// Steps whose results this step consumes.
    pub const fn prerequisites(self) -> &'static [InitStep] {
        use InitStep::*;
        match self {
            Instance => &[],
            DebugMessenger | Surface => &[Instance],
            Adapter => &[Surface],
            LogicalDevice => &[Adapter],
            Swapchain => &[LogicalDevice],
            RenderPass => &[Swapchain],
            DescriptorLayout | CommandPool | TextureSampler | SyncObjects => &[LogicalDevice],
            Pipeline => &[RenderPass, DescriptorLayout],
            DepthResources | UniformBuffers | DescriptorPool => &[Swapchain],
            Framebuffers => &[RenderPass, DepthResources],
            TextureImage | VertexBuffer | IndexBuffer => &[CommandPool],
            DescriptorSets => &[DescriptorLayout, DescriptorPool, UniformBuffers, TextureImage, TextureSampler],
            CommandBuffers => &[Pipeline, Framebuffers, VertexBuffer, IndexBuffer, DescriptorSets],
        }
    }

    /// The feature a step exists for, if it is optional.
    pub const fn feature(self) -> Option<RenderFeatures> {
        match self {
            InitStep::DepthResources => Some(RenderFeatures::DEPTH),
            InitStep::TextureImage | InitStep::TextureSampler => Some(RenderFeatures::TEXTURING),
            _ => None,
        }
    }

    /// Steps whose output is tied to one swapchain generation and is rebuilt
    /// with it.
    pub const fn per_swapchain(self) -> bool {
        matches!(
            self,
            InitStep::Swapchain
                | InitStep::RenderPass
                | InitStep::Pipeline
                | InitStep::DepthResources
                | InitStep::Framebuffers
                | InitStep::UniformBuffers
                | InitStep::DescriptorPool
                | InitStep::DescriptorSets
                | InitStep::CommandBuffers
        )
    }

    pub fn enabled(self, features: RenderFeatures) -> bool {
        self.feature().map_or(true, |f| features.contains(f))
    }
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A step failed. `completed` lists, in order, the steps that finished before
/// it and therefore need tearing down.
#[derive(Debug, Error)]
#[error("init step {step} failed after {} completed steps: {source}", completed.len())]
pub struct InitFailure {
    pub step: InitStep,
    pub completed: Vec<InitStep>,
    #[source]
    pub source: VkError,
}

impl From<InitFailure> for VkError {
    fn from(f: InitFailure) -> Self {
        VkError::Init {
            step: f.step,
            source: Box::new(f.source),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitPlan {
    steps: Vec<InitStep>,
}

impl InitPlan {
    /// The canonical order, minus steps for disabled features.
    pub fn new(features: RenderFeatures) -> Result<Self, VkError> {
        Self::from_steps(&InitStep::ALL, features)
    }

    /// Validates a custom order. Prerequisites dropped for a disabled feature
    /// are ignored.
    pub fn from_steps(steps: &[InitStep], features: RenderFeatures) -> Result<Self, VkError> {
        let steps: Vec<InitStep> = steps.iter().copied().filter(|s| s.enabled(features)).collect();
        for (i, &step) in steps.iter().enumerate() {
            for &needs in step.prerequisites() {
                if needs.enabled(features) && !steps[..i].contains(&needs) {
                    return Err(VkError::InitOrder { step, needs });
                }
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[InitStep] {
        &self.steps
    }

    pub fn contains(&self, step: InitStep) -> bool {
        self.steps.contains(&step)
    }

    /// Runs each step through `exec`, stopping at the first error.
    pub fn run<F>(&self, mut exec: F) -> Result<(), InitFailure>
    where
        F: FnMut(InitStep) -> Result<(), VkError>,
    {
        let mut completed = Vec::with_capacity(self.steps.len());
        for &step in &self.steps {
            if let Err(source) = exec(step) {
                return Err(InitFailure {
                    step,
                    completed,
                    source,
                });
            }
            completed.push(step);
        }
        Ok(())
    }
}

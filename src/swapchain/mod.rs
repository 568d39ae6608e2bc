//! Swapchain lifecycle: format choice, creation sized to the view configs,
//! per-image acquire/wait/release, and per-view sub-image slicing.

use crate::error::{XrError, XrResult, invoke};
use crate::vr::{
    InstanceHandle, Rect2D, SessionHandle, SubImage, SwapchainCreateInfo, SwapchainHandle,
    SwapchainImage, SwapchainUsage, ViewConfig, XrDuration, XrRuntime,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const GL_SRGB8_ALPHA8: i64 = 0x8C43;
pub const GL_SRGB8: i64 = 0x8C41;

/// How views map onto swapchains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapchainLayout {
    /// One full-size swapchain per view.
    #[default]
    PerView,
    /// A single swapchain as wide as all views together, sliced horizontally.
    DoubleWide,
}

impl SwapchainLayout {
    pub fn from_double_wide(double_wide: bool) -> Self {
        if double_wide {
            SwapchainLayout::DoubleWide
        } else {
            SwapchainLayout::PerView
        }
    }

    /// Swapchain extents for `views` under this layout.
    pub fn extents(self, views: &[ViewConfig]) -> Vec<[u32; 2]> {
        match self {
            SwapchainLayout::PerView => views.iter().map(ViewConfig::recommended_size).collect(),
            SwapchainLayout::DoubleWide if views.is_empty() => Vec::new(),
            SwapchainLayout::DoubleWide => {
                let width = views.iter().map(|view| view.recommended_width).sum();
                let height = views
                    .iter()
                    .map(|view| view.recommended_height)
                    .max()
                    .unwrap_or(0);
                vec![[width, height]]
            }
        }
    }

    /// Sub-image regions for `view_count` views over `swapchains`.
    pub fn slice(self, swapchains: &[SwapchainResource], view_count: usize) -> Vec<SubImage> {
        match self {
            SwapchainLayout::PerView => swapchains
                .iter()
                .take(view_count)
                .map(|chain| SubImage {
                    swapchain: chain.handle,
                    rect: Rect2D::new(0, 0, chain.width as i32, chain.height as i32),
                    array_index: 0,
                })
                .collect(),
            SwapchainLayout::DoubleWide => {
                let Some(chain) = swapchains.first() else {
                    return Vec::new();
                };
                if view_count == 0 {
                    return Vec::new();
                }
                let slice_width = chain.width as i32 / view_count as i32;
                (0..view_count)
                    .map(|index| SubImage {
                        swapchain: chain.handle,
                        rect: Rect2D::new(
                            index as i32 * slice_width,
                            0,
                            slice_width,
                            chain.height as i32,
                        ),
                        array_index: 0,
                    })
                    .collect()
            }
        }
    }
}

/// Picks the swapchain format: sRGB with alpha, then sRGB, else the
/// runtime's first advertised format.
pub fn select_format(formats: &[i64]) -> XrResult<i64> {
    let first = *formats.first().ok_or(XrError::NoSwapchainFormats)?;
    let chosen = [GL_SRGB8_ALPHA8, GL_SRGB8]
        .into_iter()
        .find(|preferred| formats.contains(preferred))
        .unwrap_or(first);
    Ok(chosen)
}

/// A live swapchain and the images the runtime gave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainResource {
    pub handle: SwapchainHandle,
    pub width: u32,
    pub height: u32,
    pub images: Vec<SwapchainImage>,
    acquired: Option<u32>,
    waited: bool,
}

impl SwapchainResource {
    fn new(handle: SwapchainHandle, width: u32, height: u32, images: Vec<SwapchainImage>) -> Self {
        Self {
            handle,
            width,
            height,
            images,
            acquired: None,
            waited: false,
        }
    }

    /// Index of the image currently held between acquire and release, even
    /// if its wait has not completed.
    pub fn acquired_index(&self) -> Option<u32> {
        self.acquired
    }

    /// The held image once it is safe to render into.
    pub fn acquired_image(&self) -> Option<SwapchainImage> {
        if !self.waited {
            return None;
        }
        self.acquired
            .and_then(|index| self.images.get(index as usize).copied())
    }

    fn forget_acquired(&mut self) {
        self.acquired = None;
        self.waited = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image_index: u32,
    pub image: SwapchainImage,
}

/// Depth targets keyed by the color texture they pair with.
///
/// Renderers fill it lazily the first time they see a color texture; the
/// frame loop clears it whenever the swapchain set is recreated.
#[derive(Debug, Clone)]
pub struct DepthTargetCache<T = u32> {
    targets: HashMap<u32, T>,
}

impl<T> DepthTargetCache<T> {
    pub fn new() -> Self {
        Self {
            targets: HashMap::new(),
        }
    }

    pub fn get(&self, color: SwapchainImage) -> Option<&T> {
        self.targets.get(&color.texture)
    }

    pub fn get_or_insert_with<F>(&mut self, color: SwapchainImage, create: F) -> &mut T
    where
        F: FnOnce() -> T,
    {
        self.targets.entry(color.texture).or_insert_with(create)
    }

    /// Drops every cached target, returning them so the caller can free them.
    pub fn clear(&mut self) -> Vec<T> {
        self.targets.drain().map(|(_, target)| target).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl<T> Default for DepthTargetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct SwapchainManager {
    layout: SwapchainLayout,
    format: Option<i64>,
    swapchains: Vec<SwapchainResource>,
    created_for: Vec<[u32; 2]>,
    generation: u64,
}

impl SwapchainManager {
    pub fn new(layout: SwapchainLayout) -> Self {
        Self {
            layout,
            format: None,
            swapchains: Vec::new(),
            created_for: Vec::new(),
            generation: 0,
        }
    }

    pub fn layout(&self) -> SwapchainLayout {
        self.layout
    }

    pub fn format(&self) -> Option<i64> {
        self.format
    }

    pub fn swapchains(&self) -> &[SwapchainResource] {
        &self.swapchains
    }

    pub fn len(&self) -> usize {
        self.swapchains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swapchains.is_empty()
    }

    /// Bumped every time the swapchain set is recreated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when the set is missing or was sized for different views.
    pub fn needs_resize(&self, view_configs: &[ViewConfig]) -> bool {
        if self.swapchains.is_empty() {
            return true;
        }
        self.created_for.len() != view_configs.len()
            || self
                .created_for
                .iter()
                .zip(view_configs)
                .any(|(size, view)| *size != view.recommended_size())
    }

    /// Replaces the swapchain set with one sized for `view_configs`.
    pub fn create<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        session: SessionHandle,
        view_configs: &[ViewConfig],
    ) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        if let Err(err) = self.destroy(runtime, instance) {
            log::warn!("[swapchain] stale swapchains not fully destroyed: {err}");
        }

        let extents = self.layout.extents(view_configs);
        if extents.is_empty() {
            return Err(XrError::NoViews);
        }

        let formats = invoke(
            runtime,
            instance,
            "xrEnumerateSwapchainFormats",
            XrError::Enumeration,
            |rt| rt.enumerate_swapchain_formats(session),
        )?;
        let format = select_format(&formats)?;
        log::debug!(
            "[swapchain] formats {:x?}, using {format:#x}",
            formats
        );

        self.generation += 1;
        self.format = Some(format);
        for [width, height] in extents {
            let info = SwapchainCreateInfo {
                usage: SwapchainUsage {
                    color_attachment: true,
                    sampled: true,
                },
                format,
                sample_count: 1,
                width,
                height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            };
            let handle = invoke(
                runtime,
                instance,
                "xrCreateSwapchain",
                XrError::Creation,
                |rt| rt.create_swapchain(session, &info),
            )?;
            let images = match invoke(
                runtime,
                instance,
                "xrEnumerateSwapchainImages",
                XrError::Enumeration,
                |rt| rt.enumerate_swapchain_images(handle),
            ) {
                Ok(images) => images,
                Err(err) => {
                    if let Err(destroy_err) = runtime.destroy_swapchain(handle) {
                        log::warn!("[swapchain] leaked swapchain after failed enumerate: {destroy_err}");
                    }
                    return Err(err);
                }
            };
            self.swapchains
                .push(SwapchainResource::new(handle, width, height, images));
        }
        self.created_for = view_configs
            .iter()
            .map(ViewConfig::recommended_size)
            .collect();

        log::info!(
            "[swapchain] created {} {:?} swapchain(s) for {} view(s)",
            self.swapchains.len(),
            self.layout,
            view_configs.len()
        );
        Ok(())
    }

    /// Acquires the next image of swapchain `index` and waits until it is
    /// renderable.
    ///
    /// The image counts as held as soon as the runtime hands it out, so a
    /// failed wait still leaves it for [`release_image`](Self::release_image)
    /// or [`release_all`](Self::release_all) to give back.
    ///
    /// # Panics
    ///
    /// If the swapchain already holds an acquired image, or `index` is out
    /// of range.
    pub fn acquire_image<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        index: usize,
    ) -> XrResult<AcquiredImage>
    where
        R: XrRuntime + ?Sized,
    {
        let chain = &mut self.swapchains[index];
        assert!(
            chain.acquired.is_none(),
            "swapchain {index} acquired twice without a release"
        );
        let handle = chain.handle;
        let image_index = invoke(
            runtime,
            instance,
            "xrAcquireSwapchainImage",
            XrError::Acquire,
            |rt| rt.acquire_swapchain_image(handle),
        )?;
        chain.acquired = Some(image_index);
        wait_image(runtime, instance, chain)?;
        let image = chain
            .images
            .get(image_index as usize)
            .copied()
            .ok_or(XrError::NotInitialized("swapchain image"))?;
        Ok(AcquiredImage { image_index, image })
    }

    /// Releases the image held by swapchain `index`. An image whose wait
    /// failed is waited on again first; runtimes refuse to release it
    /// otherwise.
    ///
    /// # Panics
    ///
    /// If no image of that swapchain is currently acquired.
    pub fn release_image<R>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        index: usize,
    ) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        let chain = &mut self.swapchains[index];
        assert!(
            chain.acquired.is_some(),
            "swapchain {index} released without a matching acquire"
        );
        if !chain.waited {
            log::debug!("[swapchain] waiting on swapchain {index} again before release");
            wait_image(runtime, instance, chain)?;
        }
        let handle = chain.handle;
        invoke(
            runtime,
            instance,
            "xrReleaseSwapchainImage",
            XrError::Release,
            |rt| rt.release_swapchain_image(handle),
        )?;
        chain.forget_acquired();
        Ok(())
    }

    pub fn is_acquired(&self, index: usize) -> bool {
        self.swapchains
            .get(index)
            .is_some_and(|chain| chain.acquired.is_some())
    }

    /// Releases every image still held; returns the first failure.
    pub fn release_all<R>(&mut self, runtime: &mut R, instance: InstanceHandle) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        let mut first_error = None;
        for index in 0..self.swapchains.len() {
            if !self.is_acquired(index) {
                continue;
            }
            log::warn!("[swapchain] image of swapchain {index} still acquired at submit; releasing");
            if let Err(err) = self.release_image(runtime, instance, index) {
                // Forget the image so the next acquire is not refused.
                self.swapchains[index].forget_acquired();
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Destroys every swapchain. Safe to call repeatedly.
    pub fn destroy<R>(&mut self, runtime: &mut R, instance: InstanceHandle) -> XrResult<()>
    where
        R: XrRuntime + ?Sized,
    {
        let mut first_error = None;
        for chain in self.swapchains.drain(..) {
            let result = invoke(
                runtime,
                instance,
                "xrDestroySwapchain",
                XrError::Destroy,
                |rt| rt.destroy_swapchain(chain.handle),
            );
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        self.created_for.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Per-view render regions for the current set.
    pub fn sub_images(&self, view_count: usize) -> Vec<SubImage> {
        self.layout.slice(&self.swapchains, view_count)
    }

    /// Index of the swapchain view `view_index` renders into.
    pub fn swapchain_index_for_view(&self, view_index: usize) -> usize {
        match self.layout {
            SwapchainLayout::PerView => view_index,
            SwapchainLayout::DoubleWide => 0,
        }
    }
}

fn wait_image<R>(
    runtime: &mut R,
    instance: InstanceHandle,
    chain: &mut SwapchainResource,
) -> XrResult<()>
where
    R: XrRuntime + ?Sized,
{
    let handle = chain.handle;
    invoke(
        runtime,
        instance,
        "xrWaitSwapchainImage",
        XrError::Acquire,
        |rt| rt.wait_swapchain_image(handle, XrDuration::INFINITE),
    )?;
    chain.waited = true;
    Ok(())
}

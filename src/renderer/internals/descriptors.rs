use ash::prelude::VkResult;
use ash::vk;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use smallvec::SmallVec;

/// Growth applied to `sets_per_pool` every time the growable allocator creates a pool
pub const POOL_GROWTH_FACTOR: f32 = 1.5;
/// Upper bound on the set capacity of a single pool
pub const MAX_SETS_PER_POOL: u32 = 4092;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    pub descriptor_type: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(descriptor_type: vk::DescriptorType, ratio: f32) -> Self {
        Self { descriptor_type, ratio }
    }
}

/// Per-type descriptor counts for a pool that can hold `max_sets` sets
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> SmallVec<[vk::DescriptorPoolSize; 8]> {
    ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.descriptor_type,
            descriptor_count: (ratio.ratio * max_sets as f32) as u32,
        })
        .collect()
}

/// The subset of device calls the descriptor allocators make.
///
/// Implemented for `ash::Device`; tests substitute a bookkeeping mock.
pub trait DescriptorPoolDevice {
    fn create_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VkResult<vk::DescriptorPool>;

    fn reset_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;

    fn destroy_pool(&self, pool: vk::DescriptorPool);

    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
}

impl DescriptorPoolDevice for ash::Device {
    fn create_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VkResult<vk::DescriptorPool> {
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        unsafe { self.create_descriptor_pool(&pool_info, None) }
    }

    fn reset_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        unsafe { self.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }
}

/// Single-pool allocator for sets whose count is known up front
pub struct DescriptorAllocator {
    pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    pub fn init<D: DescriptorPoolDevice + ?Sized>(
        device: &D,
        max_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> Result<Self> {
        let sizes = pool_sizes(max_sets, ratios);
        let pool = device
            .create_pool(max_sets, &sizes, vk::DescriptorPoolCreateFlags::empty())
            .wrap_err("Failed to create fixed descriptor pool")?;
        Ok(Self { pool })
    }

    pub fn allocate<D: DescriptorPoolDevice + ?Sized>(
        &self,
        device: &D,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        device
            .allocate_set(self.pool, layout)
            .map_err(|e| eyre!(
                "Fixed descriptor pool could not allocate a set for layout {:?}: {}",
                layout,
                e,
            ))
    }

    pub fn clear<D: DescriptorPoolDevice + ?Sized>(&self, device: &D) -> Result<()> {
        Ok(device.reset_pool(self.pool)?)
    }

    pub fn destroy<D: DescriptorPoolDevice + ?Sized>(&mut self, device: &D) {
        if self.pool != vk::DescriptorPool::null() {
            device.destroy_pool(self.pool);
            self.pool = vk::DescriptorPool::null();
        }
    }
}

/// Allocator that creates ever-larger pools on demand and recycles all of them in bulk.
///
/// Pools that ran out of space are parked in `full_pools` until the next [`clear_pools`],
/// which resets every pool and makes it available again without freeing any memory.
///
/// [`clear_pools`]: DescriptorAllocatorGrowable::clear_pools
pub struct DescriptorAllocatorGrowable {
    ratios: SmallVec<[PoolSizeRatio; 4]>,
    full_pools: Vec<vk::DescriptorPool>,
    ready_pools: Vec<vk::DescriptorPool>,
    sets_per_pool: u32,
}

impl DescriptorAllocatorGrowable {
    pub fn init<D: DescriptorPoolDevice + ?Sized>(
        device: &D,
        initial_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> Result<Self> {
        let ratios = SmallVec::from_slice(ratios);
        let first_pool = Self::create_pool(device, initial_sets, &ratios)?;

        Ok(Self {
            ratios,
            full_pools: Vec::new(),
            ready_pools: vec![first_pool],
            sets_per_pool: grow_sets_per_pool(initial_sets),
        })
    }

    pub fn allocate<D: DescriptorPoolDevice + ?Sized>(
        &mut self,
        device: &D,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let mut pool = self.get_pool(device)?;

        let result = match device.allocate_set(pool, layout) {
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.full_pools.push(pool);
                pool = self.get_pool(device)?;
                device.allocate_set(pool, layout)
            }
            other => other,
        };

        self.ready_pools.push(pool);

        result.map_err(|e| eyre!(
            "Could not allocate a descriptor set for layout {:?}: {}",
            layout,
            e,
        ))
    }

    pub fn clear_pools<D: DescriptorPoolDevice + ?Sized>(&mut self, device: &D) -> Result<()> {
        for pool in &self.ready_pools {
            device.reset_pool(*pool)?;
        }
        for pool in self.full_pools.drain(..) {
            device.reset_pool(pool)?;
            self.ready_pools.push(pool);
        }
        Ok(())
    }

    pub fn destroy_pools<D: DescriptorPoolDevice + ?Sized>(&mut self, device: &D) {
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            device.destroy_pool(pool);
        }
    }

    pub fn pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }

    /// Capacity the next newly created pool will get
    pub fn next_pool_capacity(&self) -> u32 {
        self.sets_per_pool
    }

    fn get_pool<D: DescriptorPoolDevice + ?Sized>(&mut self, device: &D) -> Result<vk::DescriptorPool> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }

        let pool = Self::create_pool(device, self.sets_per_pool, &self.ratios)?;
        log::debug!(
            "Descriptor allocator grew: new pool with {} sets ({} pools total)",
            self.sets_per_pool,
            self.pool_count() + 1,
        );
        self.sets_per_pool = grow_sets_per_pool(self.sets_per_pool);
        Ok(pool)
    }

    fn create_pool<D: DescriptorPoolDevice + ?Sized>(
        device: &D,
        set_count: u32,
        ratios: &[PoolSizeRatio],
    ) -> Result<vk::DescriptorPool> {
        let sizes = pool_sizes(set_count, ratios);
        device
            .create_pool(set_count, &sizes, vk::DescriptorPoolCreateFlags::empty())
            .wrap_err_with(|| format!("Failed to create descriptor pool with {set_count} sets"))
    }
}

fn grow_sets_per_pool(current: u32) -> u32 {
    ((current as f32 * POOL_GROWTH_FACTOR).ceil() as u32)
        .max(current.saturating_add(1))
        .min(MAX_SETS_PER_POOL)
}

#[derive(Debug, Clone, Copy)]
pub enum DescriptorInfo {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
}

#[derive(Debug, Clone, Copy)]
pub struct PendingWrite {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub info: DescriptorInfo,
}

/// Collects image and buffer bindings, then writes them into a set in one call
#[derive(Default)]
pub struct DescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_image(
        &mut self,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        image_layout: vk::ImageLayout,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: DescriptorInfo::Image(vk::DescriptorImageInfo {
                sampler,
                image_view,
                image_layout,
            }),
        });
        self
    }

    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                buffer,
                offset,
                range: size,
            }),
        });
        self
    }

    pub fn pending(&self) -> &[PendingWrite] {
        &self.writes
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    pub fn update_set(&self, device: &ash::Device, set: vk::DescriptorSet) {
        let writes = self
            .writes
            .iter()
            .map(|write| {
                let descriptor_write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.descriptor_type);
                match &write.info {
                    DescriptorInfo::Image(info) => {
                        descriptor_write.image_info(std::slice::from_ref(info))
                    }
                    DescriptorInfo::Buffer(info) => {
                        descriptor_write.buffer_info(std::slice::from_ref(info))
                    }
                }
            })
            .collect::<SmallVec<[vk::WriteDescriptorSet; 8]>>();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    struct MockPool {
        capacity: u32,
        used: u32,
    }

    /// Tracks set capacity per pool and hands out fake handles
    #[derive(Default)]
    struct MockDevice {
        pools: RefCell<HashMap<u64, MockPool>>,
        created: RefCell<Vec<u32>>,
        next_handle: Cell<u64>,
        exhausted: Cell<bool>,
    }

    impl MockDevice {
        fn fresh_handle(&self) -> u64 {
            let handle = self.next_handle.get() + 1;
            self.next_handle.set(handle);
            handle
        }

        fn pools_created(&self) -> usize {
            self.created.borrow().len()
        }

        fn live_pools(&self) -> usize {
            self.pools.borrow().len()
        }
    }

    impl DescriptorPoolDevice for MockDevice {
        fn create_pool(
            &self,
            max_sets: u32,
            _pool_sizes: &[vk::DescriptorPoolSize],
            _flags: vk::DescriptorPoolCreateFlags,
        ) -> VkResult<vk::DescriptorPool> {
            let handle = self.fresh_handle();
            self.pools.borrow_mut().insert(handle, MockPool { capacity: max_sets, used: 0 });
            self.created.borrow_mut().push(max_sets);
            Ok(vk::DescriptorPool::from_raw(handle))
        }

        fn reset_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
            let mut pools = self.pools.borrow_mut();
            let pool = pools
                .get_mut(&pool.as_raw())
                .ok_or(vk::Result::ERROR_UNKNOWN)?;
            pool.used = 0;
            Ok(())
        }

        fn destroy_pool(&self, pool: vk::DescriptorPool) {
            self.pools.borrow_mut().remove(&pool.as_raw());
        }

        fn allocate_set(
            &self,
            pool: vk::DescriptorPool,
            _layout: vk::DescriptorSetLayout,
        ) -> VkResult<vk::DescriptorSet> {
            let handle = self.fresh_handle();
            let mut pools = self.pools.borrow_mut();
            let pool = pools
                .get_mut(&pool.as_raw())
                .ok_or(vk::Result::ERROR_UNKNOWN)?;
            if self.exhausted.get() || pool.used >= pool.capacity {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            pool.used += 1;
            Ok(vk::DescriptorSet::from_raw(handle))
        }
    }

    const RATIOS: [PoolSizeRatio; 2] = [
        PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
        PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.5),
    ];

    fn layout() -> vk::DescriptorSetLayout {
        vk::DescriptorSetLayout::from_raw(0xdead)
    }

    #[test]
    fn pool_sizes_scale_with_set_count() {
        let sizes = pool_sizes(10, &RATIOS);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 30);
        assert_eq!(sizes[1].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 5);
    }

    #[test]
    fn growable_fills_initial_pool_before_growing() {
        const CAPACITY: u32 = 4;
        let device = MockDevice::default();
        let mut allocator = DescriptorAllocatorGrowable::init(&device, CAPACITY, &RATIOS).unwrap();
        assert_eq!(device.pools_created(), 1);

        for _ in 0..CAPACITY {
            allocator.allocate(&device, layout()).unwrap();
        }
        assert_eq!(device.pools_created(), 1);

        allocator.allocate(&device, layout()).unwrap();
        assert_eq!(device.pools_created(), 2);
        let grown = device.created.borrow()[1];
        assert!(grown > CAPACITY, "new pool has {grown} sets, expected more than {CAPACITY}");
        assert_eq!(allocator.pool_count(), 2);
    }

    #[test]
    fn clear_pools_recycles_instead_of_creating() {
        const CAPACITY: u32 = 4;
        let device = MockDevice::default();
        let mut allocator = DescriptorAllocatorGrowable::init(&device, CAPACITY, &RATIOS).unwrap();

        for _ in 0..=CAPACITY {
            allocator.allocate(&device, layout()).unwrap();
        }
        let created_before_clear = device.pools_created();

        allocator.clear_pools(&device).unwrap();

        for _ in 0..CAPACITY {
            allocator.allocate(&device, layout()).unwrap();
        }
        assert_eq!(device.pools_created(), created_before_clear);
        assert_eq!(allocator.pool_count(), created_before_clear);
    }

    #[test]
    fn growth_is_capped() {
        let device = MockDevice::default();
        let mut allocator = DescriptorAllocatorGrowable::init(&device, 4000, &RATIOS).unwrap();
        assert_eq!(allocator.next_pool_capacity(), MAX_SETS_PER_POOL);

        for _ in 0..=4000 {
            allocator.allocate(&device, layout()).unwrap();
        }
        assert_eq!(*device.created.borrow(), vec![4000, MAX_SETS_PER_POOL]);
        assert_eq!(allocator.next_pool_capacity(), MAX_SETS_PER_POOL);
    }

    #[test]
    fn growth_always_increases_small_pools() {
        assert_eq!(grow_sets_per_pool(1), 2);
        assert_eq!(grow_sets_per_pool(2), 3);
        assert_eq!(grow_sets_per_pool(10), 15);
        assert_eq!(grow_sets_per_pool(MAX_SETS_PER_POOL), MAX_SETS_PER_POOL);
    }

    #[test]
    fn second_failure_after_growth_is_an_error() {
        let device = MockDevice::default();
        let mut allocator = DescriptorAllocatorGrowable::init(&device, 4, &RATIOS).unwrap();
        device.exhausted.set(true);

        assert!(allocator.allocate(&device, layout()).is_err());
        // Exactly one retry: the first pool plus a single grown one
        assert_eq!(device.pools_created(), 2);
        assert_eq!(allocator.pool_count(), 2);
    }

    #[test]
    fn destroy_pools_releases_every_pool() {
        let device = MockDevice::default();
        let mut allocator = DescriptorAllocatorGrowable::init(&device, 2, &RATIOS).unwrap();
        for _ in 0..10 {
            allocator.allocate(&device, layout()).unwrap();
        }
        assert!(device.live_pools() > 1);

        allocator.destroy_pools(&device);

        assert_eq!(device.live_pools(), 0);
        assert_eq!(allocator.pool_count(), 0);
    }

    #[test]
    fn fixed_allocator_fails_once_exhausted() {
        let device = MockDevice::default();
        let mut allocator = DescriptorAllocator::init(&device, 2, &RATIOS).unwrap();

        allocator.allocate(&device, layout()).unwrap();
        allocator.allocate(&device, layout()).unwrap();
        assert!(allocator.allocate(&device, layout()).is_err());
        assert_eq!(device.pools_created(), 1);

        allocator.clear(&device).unwrap();
        allocator.allocate(&device, layout()).unwrap();

        allocator.destroy(&device);
        assert_eq!(device.live_pools(), 0);
    }

    #[test]
    fn writer_stages_writes_in_order() {
        let mut writer = DescriptorWriter::new();
        let buffer = vk::Buffer::from_raw(7);
        let view = vk::ImageView::from_raw(9);
        let sampler = vk::Sampler::from_raw(11);

        writer
            .write_buffer(0, buffer, 256, 64, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                1,
                view,
                sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );

        let pending = writer.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].binding, 0);
        match pending[0].info {
            DescriptorInfo::Buffer(info) => {
                assert_eq!(info.buffer, buffer);
                assert_eq!(info.offset, 64);
                assert_eq!(info.range, 256);
            }
            DescriptorInfo::Image(_) => panic!("binding 0 should be a buffer write"),
        }
        assert_eq!(pending[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        writer.clear();
        assert!(writer.pending().is_empty());
    }
}

//! Plain-data configuration shapes, analogous to the two init tables a
//! deployment would otherwise hand-assemble at startup: one sizing each
//! pbuf/pvbuf pool, one describing the external-region slots a caller
//! intends to register into after the manager is built.
//!
//! These are deliberately inert data — building a [`BufferManager`] from
//! them does not itself register any external region, since a region's
//! `{free, bump_refcnt}` vtable is a trait object supplied by the caller,
//! not something a config value can carry.
//!
//! [`BufferManager`]: crate::manager::BufferManager

use crate::manager::BufferManagerConfig;
use crate::pvbuf_alloc::DEFAULT_FRACT;

/// Sizing for the pbuf size-class pools.
#[derive(Debug, Clone, Copy)]
pub struct PbufPoolConfig {
    pub objs_per_class: usize,
}

impl Default for PbufPoolConfig {
    fn default() -> Self {
        Self { objs_per_class: 1024 }
    }
}

/// Sizing and overflow throttle for the pvbuf size-class pools.
#[derive(Debug, Clone, Copy)]
pub struct PvbufPoolConfig {
    pub objs_per_class: usize,
    pub overflow_fract: u32,
}

impl Default for PvbufPoolConfig {
    fn default() -> Self {
        Self {
            objs_per_class: 1024,
            overflow_fract: DEFAULT_FRACT,
        }
    }
}

/// How many external-region slots a deployment plans to use. Purely
/// informational at init time — [`ExternalRegionTable`](crate::external::ExternalRegionTable)
/// always reserves the full fixed slot counts (3 short, 64 long); this
/// exists so a caller's startup config can document intent and be logged
/// alongside the pool sizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalRegionConfig {
    pub short_regions_used: u8,
    pub long_regions_used: u8,
}

/// The full startup configuration for a [`BufferManager`](crate::manager::BufferManager).
#[derive(Debug, Clone, Copy, Default)]
pub struct PvbmConfig {
    pub pbuf_pool: PbufPoolConfig,
    pub pvbuf_pool: PvbufPoolConfig,
    pub external: ExternalRegionConfig,
}

impl From<PvbmConfig> for BufferManagerConfig {
    fn from(config: PvbmConfig) -> Self {
        Self {
            pbufs_per_class: config.pbuf_pool.objs_per_class,
            pvbufs_per_class: config.pvbuf_pool.objs_per_class,
            pvbuf_overflow_fract: config.pvbuf_pool.overflow_fract,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_converts_to_manager_config() {
        let config = PvbmConfig::default();
        let manager_config: BufferManagerConfig = config.into();
        assert_eq!(manager_config.pbufs_per_class, 1024);
        assert_eq!(manager_config.pvbufs_per_class, 1024);
        assert_eq!(manager_config.pvbuf_overflow_fract, DEFAULT_FRACT);
    }

    #[test]
    fn custom_pool_sizes_carry_through() {
        let config = PvbmConfig {
            pbuf_pool: PbufPoolConfig { objs_per_class: 16 },
            pvbuf_pool: PvbufPoolConfig {
                objs_per_class: 8,
                overflow_fract: 0,
            },
            external: ExternalRegionConfig::default(),
        };
        let manager_config: BufferManagerConfig = config.into();
        assert_eq!(manager_config.pbufs_per_class, 16);
        assert_eq!(manager_config.pvbufs_per_class, 8);
        assert_eq!(manager_config.pvbuf_overflow_fract, 0);
    }
}

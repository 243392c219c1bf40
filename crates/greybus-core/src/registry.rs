use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::config::{GreybusConfig, Protocol};
use crate::driver::Driver;
use crate::error::{GreybusError, Result};

struct CportEntry {
    bundle: u8,
    protocol: Protocol,
    driver: Option<Arc<dyn Driver>>,
    draining: bool,
}

/// Snapshot of one cport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CportInfo {
    pub cport: u16,
    pub bundle: u8,
    pub protocol: Protocol,
    /// Name of the bound driver, if any.
    pub driver: Option<&'static str>,
    pub draining: bool,
}

/// Where the worker should send a queued message.
pub(crate) enum Route {
    Driver(Arc<dyn Driver>),
    Draining,
    Unbound,
}

/// Fixed-size table of cports built from the configuration.
///
/// The number of entries and each entry's bundle/protocol never change;
/// only driver bindings do.
pub struct Registry {
    entries: RwLock<Vec<CportEntry>>,
    len: usize,
}

impl Registry {
    pub fn new(config: &GreybusConfig) -> Self {
        let entries: Vec<CportEntry> = config
            .cports
            .iter()
            .map(|c| CportEntry {
                bundle: c.bundle,
                protocol: c.protocol,
                driver: None,
                draining: false,
            })
            .collect();
        let len = entries.len();
        Self {
            entries: RwLock::new(entries),
            len,
        }
    }

    /// Number of cports.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bounds-checked lookup.
    pub fn get(&self, cport: u16) -> Option<CportInfo> {
        let entries = self.read();
        entries.get(usize::from(cport)).map(|e| info(cport, e))
    }

    /// All cports in order.
    pub fn snapshot(&self) -> Vec<CportInfo> {
        self.read()
            .iter()
            .enumerate()
            .map(|(i, e)| info(i as u16, e))
            .collect()
    }

    /// First cport in `bundle` carrying `protocol`.
    pub fn find(&self, bundle: u8, protocol: Protocol) -> Option<u16> {
        self.read()
            .iter()
            .position(|e| e.bundle == bundle && e.protocol == protocol)
            .map(|i| i as u16)
    }

    /// Bound driver, or `None` if the cport is out of range or unbound.
    pub fn driver(&self, cport: u16) -> Option<Arc<dyn Driver>> {
        self.read()
            .get(usize::from(cport))
            .and_then(|e| e.driver.clone())
    }

    pub fn is_bound(&self, cport: u16) -> bool {
        self.read()
            .get(usize::from(cport))
            .is_some_and(|e| e.driver.is_some())
    }

    pub(crate) fn check_range(&self, cport: u16) -> Result<()> {
        if usize::from(cport) < self.len {
            Ok(())
        } else {
            Err(GreybusError::InvalidCport(cport))
        }
    }

    pub(crate) fn route(&self, cport: u16) -> Route {
        match self.read().get(usize::from(cport)) {
            Some(entry) if entry.draining => Route::Draining,
            Some(CportEntry {
                driver: Some(driver),
                ..
            }) => Route::Driver(Arc::clone(driver)),
            _ => Route::Unbound,
        }
    }

    /// Bundle configured for `cport`.
    pub(crate) fn bundle(&self, cport: u16) -> Result<u8> {
        self.read()
            .get(usize::from(cport))
            .map(|e| e.bundle)
            .ok_or(GreybusError::InvalidCport(cport))
    }

    /// Fail with `AlreadyBound` if a driver occupies `cport`.
    pub(crate) fn ensure_vacant(&self, cport: u16) -> Result<()> {
        let entries = self.read();
        let entry = entries
            .get(usize::from(cport))
            .ok_or(GreybusError::InvalidCport(cport))?;
        match &entry.driver {
            Some(bound) => Err(GreybusError::AlreadyBound {
                cport,
                driver: bound.name(),
            }),
            None => Ok(()),
        }
    }

    /// Bind `driver` and clear any pending drain.
    pub(crate) fn bind(&self, cport: u16, driver: Arc<dyn Driver>) -> Result<()> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(usize::from(cport))
            .ok_or(GreybusError::InvalidCport(cport))?;
        if let Some(bound) = &entry.driver {
            return Err(GreybusError::AlreadyBound {
                cport,
                driver: bound.name(),
            });
        }
        entry.driver = Some(driver);
        entry.draining = false;
        Ok(())
    }

    /// Mark `cport` as draining and return its driver. The binding stays in
    /// place until [`Registry::unbind`].
    pub(crate) fn begin_teardown(&self, cport: u16) -> Result<Arc<dyn Driver>> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(usize::from(cport))
            .ok_or(GreybusError::InvalidCport(cport))?;
        let driver = entry.driver.clone().ok_or(GreybusError::NotBound(cport))?;
        entry.draining = true;
        Ok(driver)
    }

    pub(crate) fn unbind(&self, cport: u16) {
        if let Some(entry) = self.write().get_mut(usize::from(cport)) {
            entry.driver = None;
        }
    }

    /// Cports that currently have a driver.
    pub(crate) fn bound_cports(&self) -> Vec<u16> {
        self.read()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.driver.is_some())
            .map(|(i, _)| i as u16)
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<CportEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<CportEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn info(cport: u16, entry: &CportEntry) -> CportInfo {
    CportInfo {
        cport,
        bundle: entry.bundle,
        protocol: entry.protocol,
        driver: entry.driver.as_ref().map(|d| d.name()),
        draining: entry.draining,
    }
}

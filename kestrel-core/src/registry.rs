/*!
 * Interface Registry
 * Host interface discovery and exclusive leasing
 */

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command::{names, CommandRunner};
use crate::error::RegistryError;

/// Longest name the kernel accepts (IFNAMSIZ minus the terminator).
const MAX_NAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceName(String);

impl InterfaceName {
    pub fn parse(name: &str) -> Result<Self, RegistryError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && !name.chars().any(|c| c.is_whitespace() || c == '/' || c == ':');
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(RegistryError::InvalidName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct LeaseTable {
    leased: Mutex<HashMap<InterfaceName, Uuid>>,
}

impl LeaseTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<InterfaceName, Uuid>> {
        self.leased.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Frees `name` only if `holder` still owns it.
    fn free(&self, name: &InterfaceName, holder: Uuid) -> bool {
        let mut leased = self.lock();
        if leased.get(name) == Some(&holder) {
            leased.remove(name);
            true
        } else {
            false
        }
    }
}

/// Process-wide bookkeeping of host interfaces and live leases.
pub struct InterfaceRegistry {
    runner: Arc<dyn CommandRunner>,
    discovered: OnceCell<BTreeSet<InterfaceName>>,
    table: Arc<LeaseTable>,
}

impl InterfaceRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            discovered: OnceCell::new(),
            table: Arc::new(LeaseTable::default()),
        }
    }

    /// Interfaces present on the host, probed once per registry.
    ///
    /// An empty set means discovery is unavailable, not that the host has
    /// no interfaces.
    pub async fn discover(&self) -> &BTreeSet<InterfaceName> {
        self.discovered
            .get_or_init(|| probe_interfaces(self.runner.as_ref()))
            .await
    }

    pub async fn acquire(&self, name: &str) -> Result<InterfaceLease, RegistryError> {
        let name = InterfaceName::parse(name)?;

        let discovered = self.discover().await;
        if discovered.is_empty() {
            warn!("Interfaces cannot be validated, accepting {}", name);
        } else if !discovered.contains(&name) {
            error!("{} is not a valid interface", name);
            return Err(RegistryError::NotFound(name.to_string()));
        }

        let holder = Uuid::new_v4();
        {
            let mut leased = self.table.lock();
            if leased.contains_key(&name) {
                error!("{} is already taken", name);
                return Err(RegistryError::AlreadyTaken(name.to_string()));
            }
            leased.insert(name.clone(), holder);
        }

        info!("Interface {} leased to {}", name, holder);
        Ok(InterfaceLease {
            name,
            holder,
            released: AtomicBool::new(false),
            table: Arc::clone(&self.table),
        })
    }

    /// Returns the lease's name to the pool. Safe to call repeatedly.
    pub fn release(&self, lease: &InterfaceLease) {
        lease.release_inner();
    }

    pub fn is_leased(&self, name: &str) -> bool {
        InterfaceName::parse(name)
            .map(|n| self.table.lock().contains_key(&n))
            .unwrap_or(false)
    }

    pub fn leased(&self) -> Vec<InterfaceName> {
        let mut names: Vec<_> = self.table.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// One exclusive claim on an interface. Dropping the lease releases it.
#[derive(Debug)]
pub struct InterfaceLease {
    name: InterfaceName,
    holder: Uuid,
    released: AtomicBool,
    table: Arc<LeaseTable>,
}

impl InterfaceLease {
    pub fn name(&self) -> &InterfaceName {
        &self.name
    }

    pub fn holder(&self) -> Uuid {
        self.holder
    }

    pub fn is_live(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    pub fn release(&self) {
        self.release_inner();
    }

    fn release_inner(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.table.free(&self.name, self.holder) {
            info!("Interface {} released by {}", self.name, self.holder);
        }
    }
}

impl Drop for InterfaceLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LeaseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseTable").field("leased", &self.lock().len()).finish()
    }
}

async fn probe_interfaces(runner: &dyn CommandRunner) -> BTreeSet<InterfaceName> {
    match runner.run(names::GET_INTERFACES, &[]).await {
        Ok(output) if !output.failed() => parse_interface_list(&output.stdout()),
        Ok(output) => {
            warn!("Interface discovery failed: {}", output.stderr().trim());
            BTreeSet::new()
        }
        Err(e) => {
            warn!("Interface discovery unavailable: {}", e);
            BTreeSet::new()
        }
    }
}

/// One name per line after an optional `...:` header line.
pub fn parse_interface_list(raw: &str) -> BTreeSet<InterfaceName> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .filter_map(|line| InterfaceName::parse(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn registry_with(interfaces: &str) -> (Arc<ScriptedRunner>, InterfaceRegistry) {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(names::GET_INTERFACES, interfaces);
        let registry = InterfaceRegistry::new(runner.clone());
        (runner, registry)
    }

    #[test]
    fn interface_list_skips_header() {
        let names = parse_interface_list("Available interfaces:\nwlan0\n  wlan1 \n\n");
        let names: Vec<_> = names.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["wlan0", "wlan1"]);
    }

    #[test]
    fn names_are_validated() {
        assert!(InterfaceName::parse("wlan0").is_ok());
        for bad in ["", "wl an0", "../wlan0", "averyveryverylongname0"] {
            assert_eq!(
                InterfaceName::parse(bad),
                Err(RegistryError::InvalidName(bad.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let (_, registry) = registry_with("Available interfaces:\nwlan0\n");
        for name in ["wlan1", "eth0", "wlp2s0"] {
            assert_eq!(
                registry.acquire(name).await.unwrap_err(),
                RegistryError::NotFound(name.to_string())
            );
        }
    }

    #[tokio::test]
    async fn second_acquire_is_rejected_until_release() {
        let (_, registry) = registry_with("wlan0\nwlan1\n");

        let first = registry.acquire("wlan0").await.unwrap();
        assert_eq!(
            registry.acquire("wlan0").await.unwrap_err(),
            RegistryError::AlreadyTaken("wlan0".to_string())
        );
        // other interfaces are unaffected
        let other = registry.acquire("wlan1").await.unwrap();

        registry.release(&first);
        registry.release(&first);
        assert!(!first.is_live());

        let again = registry.acquire("wlan0").await.unwrap();
        assert_ne!(again.holder(), first.holder());
        assert_eq!(registry.leased().len(), 2);
        drop(other);
        assert_eq!(registry.leased(), vec![again.name().clone()]);
    }

    #[tokio::test]
    async fn stale_lease_cannot_free_new_holder() {
        let (_, registry) = registry_with("wlan0\n");
        let first = registry.acquire("wlan0").await.unwrap();
        first.release();
        let second = registry.acquire("wlan0").await.unwrap();

        drop(first);
        assert!(registry.is_leased("wlan0"));
        drop(second);
        assert!(!registry.is_leased("wlan0"));
    }

    #[tokio::test]
    async fn empty_discovery_skips_validation() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(names::GET_INTERFACES, "bash: iw: command not found");
        let registry = InterfaceRegistry::new(runner);

        assert!(registry.discover().await.is_empty());
        let lease = registry.acquire("anything0").await.unwrap();
        assert_eq!(lease.name().as_str(), "anything0");
        assert!(registry.acquire("anything0").await.is_err());
        assert!(registry.acquire("bad name").await.is_err());
    }

    #[tokio::test]
    async fn discovery_runs_once() {
        let (runner, registry) = registry_with("wlan0\n");
        let _a = registry.acquire("wlan0").await.unwrap();
        let _ = registry.acquire("wlan0").await;
        let _ = registry.acquire("wlan9").await;
        assert_eq!(runner.count(names::GET_INTERFACES), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_grant_one_lease() {
        let (_, registry) = registry_with("wlan0\n");
        let registry = Arc::new(registry);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.acquire("wlan0").await })
            })
            .collect();

        let mut granted = Vec::new();
        for task in tasks {
            if let Ok(lease) = task.await.unwrap() {
                granted.push(lease);
            }
        }
        assert_eq!(granted.len(), 1);
    }
}

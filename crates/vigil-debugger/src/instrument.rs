//! Binding breakpoints to probe sites in the host program.
//!
//! A probe site is a `(file, line)` pair the host marks with [`probe!`] or
//! [`ProbeRegistry::declare_site`]. [`Instrumenter::instrument`] arms a site
//! for a breakpoint id; armed probes forward to the hit pipeline, unarmed ones
//! return after a single map lookup.
//!
//! [`probe!`]: crate::probe

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use thiserror::Error;
use vigil_store::BreakpointId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    #[error("no probe sites are known in module '{file}'")]
    ModuleNotFound { file: String },

    #[error("no probe site at {file}:{line}")]
    LineNotFound { file: String, line: u32 },
}

/// Binds and unbinds breakpoints at concrete program locations.
pub trait Instrumenter: Send + Sync {
    fn instrument(&self, file: &str, line: u32, id: BreakpointId) -> Result<(), InstrumentError>;

    fn deinstrument(&self, file: &str, line: u32, id: BreakpointId)
        -> Result<(), InstrumentError>;
}

/// `\` separators become `/` and a leading `./` is dropped, so that
/// `file!()` output and client-supplied paths compare equal.
pub fn normalize_path(file: &str) -> Cow<'_, str> {
    let file = file.strip_prefix("./").unwrap_or(file);
    if file.contains('\\') {
        let replaced = file.replace('\\', "/");
        match replaced.strip_prefix("./") {
            Some(rest) => Cow::Owned(rest.to_owned()),
            None => Cow::Owned(replaced),
        }
    } else {
        Cow::Borrowed(file)
    }
}

type Sites = HashMap<String, BTreeMap<u32, Vec<BreakpointId>>>;

#[derive(Debug, Default)]
struct Bindings {
    /// Registered sites and the breakpoints armed at each.
    sites: Sites,
    /// Breakpoints bound to a site that has not registered yet. They move to
    /// `sites` when it does.
    pending: Sites,
}

impl Bindings {
    fn register(&mut self, file: &str, line: u32) -> &mut Vec<BreakpointId> {
        let waiting = self
            .pending
            .get_mut(file)
            .and_then(|lines| lines.remove(&line))
            .unwrap_or_default();
        if self.pending.get(file).is_some_and(BTreeMap::is_empty) {
            self.pending.remove(file);
        }
        let ids = self
            .sites
            .entry(file.to_owned())
            .or_default()
            .entry(line)
            .or_default();
        if !waiting.is_empty() {
            tracing::debug!(
                target: "vigil.instrument",
                file,
                line,
                breakpoint_ids = ?waiting,
                "arming pending breakpoints"
            );
        }
        for id in waiting {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn defer(&mut self, file: &str, line: u32, id: BreakpointId) {
        let ids = self
            .pending
            .entry(file.to_owned())
            .or_default()
            .entry(line)
            .or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Drops a pending binding. Returns whether there was one.
    fn forget(&mut self, file: &str, line: u32, id: BreakpointId) -> bool {
        let Some(lines) = self.pending.get_mut(file) else {
            return false;
        };
        let Some(ids) = lines.get_mut(&line) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|bound| *bound != id);
        let found = ids.len() != before;
        if ids.is_empty() {
            lines.remove(&line);
        }
        if lines.is_empty() {
            self.pending.remove(file);
        }
        found
    }
}

/// Known probe sites and the breakpoints bound to each.
///
/// Instrumenting a site that has not registered yet fails with
/// [`InstrumentError`], but the binding is remembered: it is armed as soon as
/// the site registers, either through [`ProbeRegistry::declare_site`] or on
/// its first execution.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    bindings: RwLock<Bindings>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a site known before it first executes, so that it can be armed
    /// right away.
    pub fn declare_site(&self, file: &str, line: u32) {
        let file = normalize_path(file);
        self.bindings.write().register(&file, line);
    }

    /// Breakpoints armed at a site, in the order they were bound.
    ///
    /// Registers the site on its first call, arming any breakpoints that were
    /// waiting for it. Returns `None` for an unarmed site.
    pub fn armed(&self, file: &str, line: u32) -> Option<Vec<BreakpointId>> {
        let file = normalize_path(file);
        {
            let bindings = self.bindings.read();
            if let Some(ids) = bindings.sites.get(&*file).and_then(|lines| lines.get(&line)) {
                return (!ids.is_empty()).then(|| ids.clone());
            }
        }

        tracing::trace!(target: "vigil.instrument", file = %file, line, "registering probe site");
        let mut bindings = self.bindings.write();
        let ids = bindings.register(&file, line);
        (!ids.is_empty()).then(|| ids.clone())
    }

    pub fn is_armed(&self, file: &str, line: u32) -> bool {
        let file = normalize_path(file);
        self.bindings
            .read()
            .sites
            .get(&*file)
            .and_then(|lines| lines.get(&line))
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Whether `id` waits at `file:line` for the site to register.
    pub fn is_pending(&self, file: &str, line: u32, id: BreakpointId) -> bool {
        let file = normalize_path(file);
        self.bindings
            .read()
            .pending
            .get(&*file)
            .and_then(|lines| lines.get(&line))
            .is_some_and(|ids| ids.contains(&id))
    }

    /// Every known site, sorted by file then line.
    pub fn sites(&self) -> Vec<(String, u32)> {
        let bindings = self.bindings.read();
        let mut out: Vec<_> = bindings
            .sites
            .iter()
            .flat_map(|(file, lines)| lines.keys().map(move |line| (file.clone(), *line)))
            .collect();
        out.sort();
        out
    }
}

fn locate<'a>(
    sites: &'a mut Sites,
    file: &str,
    line: u32,
) -> Result<&'a mut Vec<BreakpointId>, InstrumentError> {
    let lines = sites
        .get_mut(file)
        .ok_or_else(|| InstrumentError::ModuleNotFound {
            file: file.to_owned(),
        })?;
    lines
        .get_mut(&line)
        .ok_or_else(|| InstrumentError::LineNotFound {
            file: file.to_owned(),
            line,
        })
}

impl Instrumenter for ProbeRegistry {
    fn instrument(&self, file: &str, line: u32, id: BreakpointId) -> Result<(), InstrumentError> {
        let file = normalize_path(file);
        let mut bindings = self.bindings.write();
        match locate(&mut bindings.sites, &file, line) {
            Ok(ids) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Err(err) => {
                bindings.defer(&file, line, id);
                tracing::debug!(
                    target: "vigil.instrument",
                    file = %file,
                    line,
                    breakpoint_id = id,
                    "probe site not registered yet; breakpoint pending"
                );
                return Err(err);
            }
        }
        tracing::debug!(target: "vigil.instrument", file = %file, line, breakpoint_id = id, "probe armed");
        Ok(())
    }

    fn deinstrument(
        &self,
        file: &str,
        line: u32,
        id: BreakpointId,
    ) -> Result<(), InstrumentError> {
        let file = normalize_path(file);
        let mut bindings = self.bindings.write();
        if bindings.forget(&file, line, id) {
            tracing::debug!(target: "vigil.instrument", file = %file, line, breakpoint_id = id, "pending breakpoint dropped");
            return Ok(());
        }
        locate(&mut bindings.sites, &file, line)?.retain(|bound| *bound != id);
        tracing::debug!(target: "vigil.instrument", file = %file, line, breakpoint_id = id, "probe disarmed");
        Ok(())
    }
}

/// Marks a probe site in host code.
///
/// The first argument is a [`Debugger`](crate::Debugger); the rest name the
/// variables to capture, exactly as for [`scope!`](crate::scope). The scope
/// is only built when a breakpoint is armed at this line.
///
/// ```no_run
/// # fn demo(debugger: &vigil_debugger::Debugger) {
/// let order_id = 42;
/// let items = vec!["tea", "cake"];
/// vigil_debugger::probe!(debugger, order_id, items, count = items.len());
/// # }
/// ```
#[macro_export]
macro_rules! probe {
    ($debugger:expr $(, $($vars:tt)*)?) => {
        $debugger.probe(::std::file!(), ::std::line!(), || $crate::scope!($($($vars)*)?))
    };
}

//! Multi-segment observer chains.
//!
//! A chain watches every segment of a dotted path, not just the leaf. Each
//! installed link is a single-segment observer on the object currently
//! occupying that position. When segment *k*'s value changes identity, every
//! link below *k* is torn down and rebuilt against the new value; when the
//! final segment changes, the chain delivers through the owner's `notify`,
//! so the owner's suspend/coalesce discipline applies to chain deliveries.
//!
//! # Invariants
//!
//! 1. Links are installed strictly in segment order; link *i* always observes
//!    segment *i*.
//! 2. An absent or non-object intermediate truncates the chain at that link;
//!    the unresolved tail stays uninstalled until the value reappears, at
//!    which point the ordinary changed-value path re-extends it.
//! 3. Link closures hold only `Weak` references to the chain core and link
//!    targets hold only `Weak` references to their objects, so chains never
//!    create strong reference cycles.
//! 4. Destruction removes every installed link.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::trace;

use crate::observed::{Observed, WeakObserved};
use crate::registry::ObserverId;
use crate::value::Value;

/// One installed segment subscription.
struct ChainLink {
    target: WeakObserved,
    segment_index: usize,
    observer: ObserverId,
}

struct ChainCore {
    owner: WeakObserved,
    path: String,
    segments: SmallVec<[String; 4]>,
    links: Vec<ChainLink>,
}

impl ChainCore {
    fn teardown_from(&mut self, at: usize) {
        let ChainCore {
            links, segments, ..
        } = self;
        let at = at.min(links.len());
        for link in links.drain(at..) {
            if let Some(target) = link.target.upgrade() {
                target.remove_entry(&segments[link.segment_index], link.observer);
            }
        }
    }

    /// Install links from the current truncation point down to the leaf,
    /// stopping early at an absent or non-object intermediate.
    fn extend(core_rc: &Rc<RefCell<ChainCore>>) {
        let mut core = core_rc.borrow_mut();
        let start = core.links.len();
        if start == core.segments.len() {
            return;
        }
        let mut target = if start == 0 {
            match core.owner.upgrade() {
                Some(owner) => owner,
                None => return,
            }
        } else {
            let prev = &core.links[start - 1];
            let Some(obj) = prev.target.upgrade() else {
                return;
            };
            match obj.get(&core.segments[start - 1]) {
                Some(Value::Object(next)) => next,
                _ => return,
            }
        };

        let mut index = start;
        while index < core.segments.len() {
            let segment = core.segments[index].clone();
            let weak = Rc::downgrade(core_rc);
            let observer = target.install_link(&segment, move |before, after| {
                if let Some(core) = weak.upgrade() {
                    ChainCore::segment_changed(&core, index, before, after);
                }
            });
            core.links.push(ChainLink {
                target: target.downgrade(),
                segment_index: index,
                observer,
            });
            if index + 1 == core.segments.len() {
                break;
            }
            match target.get(&segment) {
                Some(Value::Object(next)) => {
                    target = next;
                    index += 1;
                }
                // Truncate here; the link just installed re-extends the
                // chain when this segment becomes an object.
                _ => break,
            }
        }
    }

    fn segment_changed(
        core_rc: &Rc<RefCell<ChainCore>>,
        index: usize,
        before: &Value,
        after: &Value,
    ) {
        let (is_leaf, owner, path) = {
            let core = core_rc.borrow();
            (
                index + 1 == core.segments.len(),
                core.owner.upgrade(),
                core.path.clone(),
            )
        };
        if is_leaf {
            if let Some(owner) = owner {
                owner.notify(&path, before, after);
            }
            return;
        }
        trace!(path = %path, segment = index, "chain intermediate replaced; relinking tail");
        core_rc.borrow_mut().teardown_from(index + 1);
        Self::extend(core_rc);
    }
}

/// The subscription structure covering every segment of a nested path.
pub(crate) struct ObserverChain {
    path: String,
    core: Rc<RefCell<ChainCore>>,
}

impl ObserverChain {
    /// Build a chain rooted at `owner` for a multi-segment `path`.
    pub fn new(owner: &Observed, path: &str) -> Self {
        let segments: SmallVec<[String; 4]> = path.split('.').map(String::from).collect();
        debug_assert!(segments.len() >= 2, "chains cover multi-segment paths");
        let core = Rc::new(RefCell::new(ChainCore {
            owner: owner.downgrade(),
            path: path.to_string(),
            segments,
            links: Vec::new(),
        }));
        ChainCore::extend(&core);
        Self {
            path: path.to_string(),
            core,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[cfg(test)]
    pub fn installed_links(&self) -> usize {
        self.core.borrow().links.len()
    }
}

impl Drop for ObserverChain {
    fn drop(&mut self) {
        self.core.borrow_mut().teardown_from(0);
    }
}

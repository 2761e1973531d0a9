//! Minimal pass framework: passes are named, rewrite one proc at a time,
//! and report whether they changed anything. A package-level driver runs a
//! pass over every proc in insertion order.

use strata_ir::Package;
use strata_utils::StrataResult;

/// Trait that describes named things. Required to run a pass through
/// [`run_on_package`].
pub trait Named {
    /// The name of a pass. Is used for identifying passes.
    fn name() -> &'static str;
    /// A short description of the pass.
    fn description() -> &'static str;
}

/// A pass that rewrites a single proc in place.
pub trait ProcPass {
    fn run_on_proc(
        &mut self,
        proc: &mut strata_ir::Proc,
    ) -> StrataResult<bool>;
}

/// Run `P` over every proc in the package. Returns whether any proc
/// changed.
pub fn run_on_package<P>(package: &mut Package) -> StrataResult<bool>
where
    P: ProcPass + Named + Default,
{
    let mut pass = P::default();
    let mut changed = false;
    for proc in package.procs_mut() {
        let proc_changed = pass.run_on_proc(proc)?;
        changed |= proc_changed;
    }
    if changed {
        log::debug!("pass `{}' changed the package", P::name());
    }
    Ok(changed)
}

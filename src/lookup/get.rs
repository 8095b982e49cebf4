use super::{get_from_file, GetContext, LookupEnv, ReadBudget};
use crate::config::ReadOptions;
use crate::error::Result;
use crate::version::SuperVersion;

/// Looks up `key` in `sv` at `sequence`.
///
/// The remaining time budget is checked before every level and passed down
/// as the timeout of each file read.
pub(crate) fn get(
    env: &LookupEnv<'_>,
    sv: &SuperVersion,
    key: &[u8],
    sequence: u64,
    opts: &ReadOptions,
) -> Result<Option<Vec<u8>>> {
    let budget = ReadBudget::new(env.clock, opts);
    let mut ctx = GetContext::new(key, env.merge_operator);

    if sv.mem.get(key, sequence, &mut ctx) || sv.imm.get(key, sequence, &mut ctx) {
        return ctx.finish();
    }

    let version = &sv.current;
    for level in 0..version.num_levels() {
        let files = version.files_for_key(level, key);
        if files.is_empty() {
            continue;
        }
        budget.check()?;
        for file in files {
            let table_opts = budget.table_options(opts)?;
            if get_from_file(env, file, key, sequence, &mut ctx, &table_opts)? {
                return ctx.finish();
            }
        }
    }
    ctx.finish()
}

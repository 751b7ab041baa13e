//! Builtin row filters

use serde::{Deserialize, Serialize};

use super::decision::{FilterDecision, FilterRow};
use super::errors::{FilterError, FilterResult};
use super::registry::RowFilter;
use crate::wal::{Command, UpdateOperator};

/// Sends every row unchanged. Registered under `identity` and the empty name.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl RowFilter for IdentityFilter {
    fn filter(&self, _row: &FilterRow<'_>) -> FilterResult<FilterDecision> {
        Ok(FilterDecision::Pass)
    }
}

fn default_drop_below_scn() -> u64 {
    5
}

fn default_add_delta() -> i64 {
    1
}

/// Drops early even rows and bumps `add` operands of updates.
///
/// - Rows that are not data rows pass
/// - Rows with `scn < drop_below_scn` and an even SCN are dropped
/// - `update_fields` commands get `add_delta` added to every `add`
///   operand, keeping the operand width
/// - Everything else passes, including payloads that do not parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParityDeltaFilter {
    #[serde(default = "default_drop_below_scn")]
    pub drop_below_scn: u64,
    #[serde(default = "default_add_delta")]
    pub add_delta: i64,
}

impl Default for ParityDeltaFilter {
    fn default() -> Self {
        Self {
            drop_below_scn: default_drop_below_scn(),
            add_delta: default_add_delta(),
        }
    }
}

impl RowFilter for ParityDeltaFilter {
    fn filter(&self, row: &FilterRow<'_>) -> FilterResult<FilterDecision> {
        if !row.row().tag.is_data() {
            return Ok(FilterDecision::Pass);
        }
        if row.scn() < self.drop_below_scn && row.scn() % 2 == 0 {
            return Ok(FilterDecision::Drop);
        }

        let Some(Command::UpdateFields {
            space,
            flags,
            key,
            mutations,
        }) = row.command()
        else {
            return Ok(FilterDecision::Pass);
        };

        let mut mutations = mutations.clone();
        for mutation in mutations
            .iter_mut()
            .filter(|m| m.op == UpdateOperator::Add)
        {
            mutation.add_to_operand(self.add_delta);
        }

        Ok(FilterDecision::Rewrite(Command::UpdateFields {
            space: *space,
            flags: *flags,
            key: key.clone(),
            mutations,
        }))
    }
}

/// Keeps only data rows of the spaces listed in the handshake argument.
///
/// The argument is a comma separated list of space ids such as `0,3`. An
/// empty argument keeps every space. Non-data rows and payloads that do
/// not parse always pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpaceFilter;

fn parse_spaces(arg: &[u8]) -> FilterResult<Vec<u32>> {
    let text = std::str::from_utf8(arg)
        .map_err(|_| FilterError::InvalidArg("space list is not UTF-8".to_string()))?;
    let spaces = text
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| FilterError::InvalidArg(format!("bad space id {:?}", s)))
        })
        .collect::<FilterResult<Vec<u32>>>()?;
    if spaces.is_empty() {
        return Err(FilterError::InvalidArg("no space ids".to_string()));
    }
    Ok(spaces)
}

impl RowFilter for SpaceFilter {
    fn filter(&self, row: &FilterRow<'_>) -> FilterResult<FilterDecision> {
        if row.arg().is_empty() || !row.row().tag.is_data() {
            return Ok(FilterDecision::Pass);
        }
        let Some(space) = row.command().and_then(Command::space) else {
            return Ok(FilterDecision::Pass);
        };
        if parse_spaces(row.arg())?.contains(&space) {
            Ok(FilterDecision::Pass)
        } else {
            Ok(FilterDecision::Drop)
        }
    }

    fn check_arg(&self, arg: &[u8]) -> FilterResult<()> {
        if arg.is_empty() {
            return Ok(());
        }
        parse_spaces(arg).map(|_| ())
    }
}

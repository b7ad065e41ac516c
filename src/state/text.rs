//! `Key: value` rendering of the keeper state, one field per line.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use nom::{
    bytes::complete::{tag, take_till1},
    character::complete::{line_ending, multispace0, not_line_ending, space0},
    combinator::all_consuming,
    multi::separated_list0,
    sequence::{preceded, separated_pair, terminated},
    IResult,
};

use crate::error::SerializationError;
use crate::instance::Lsn;
use crate::role::NodeRole;
use crate::state::KeeperState;

const CURRENT_ROLE: &str = "Current Role";
const ASSIGNED_ROLE: &str = "Assigned Role";
const NODE_ID: &str = "Node Id";
const GROUP: &str = "Group";
const LAST_MONITOR_CONTACT: &str = "Last Monitor Contact";
const LAST_KNOWN_POSITION: &str = "Last Known Position";

const NEVER: &str = "never";
const UNKNOWN: &str = "unknown";

pub fn render(state: &KeeperState) -> String {
    let contact = state
        .last_monitor_contact
        .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| NEVER.to_string());
    let position = state
        .last_known_position
        .map(|lsn| lsn.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    [
        (CURRENT_ROLE, state.current_role.to_string()),
        (ASSIGNED_ROLE, state.assigned_role.to_string()),
        (NODE_ID, state.node_id.to_string()),
        (GROUP, state.group_id.to_string()),
        (LAST_MONITOR_CONTACT, contact),
        (LAST_KNOWN_POSITION, position),
    ]
    .iter()
    .map(|(key, value)| format!("{}: {}\n", key, value))
    .collect()
}

fn entry(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_till1(|c| c == ':' || c == '\n'),
        tag(":"),
        preceded(space0, not_line_ending),
    )(input)
}

fn entries(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    all_consuming(terminated(separated_list0(line_ending, entry), multispace0))(input)
}

fn parse_error(reason: String) -> SerializationError {
    SerializationError::Parse {
        what: "keeper state text",
        reason,
    }
}

pub fn parse(input: &str) -> Result<KeeperState, SerializationError> {
    let (_, pairs) = entries(input).map_err(|e| parse_error(e.to_string()))?;
    let fields: HashMap<&str, &str> = pairs
        .into_iter()
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();
    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| parse_error(format!("missing \"{}\"", key)))
    };
    let role = |key: &str| -> Result<NodeRole, SerializationError> {
        let value = field(key)?;
        value
            .parse()
            .map_err(|_| parse_error(format!("{}: unknown role \"{}\"", key, value)))
    };

    let node_id = field(NODE_ID)?
        .parse::<i64>()
        .map_err(|e| parse_error(format!("{}: {}", NODE_ID, e)))?;
    let group_id = field(GROUP)?
        .parse::<i32>()
        .map_err(|e| parse_error(format!("{}: {}", GROUP, e)))?;
    let last_monitor_contact = match field(LAST_MONITOR_CONTACT)? {
        NEVER => None,
        text => Some(
            DateTime::parse_from_rfc3339(text)
                .map_err(|e| parse_error(format!("{}: {}", LAST_MONITOR_CONTACT, e)))?
                .with_timezone(&Utc),
        ),
    };
    let last_known_position = match field(LAST_KNOWN_POSITION)? {
        UNKNOWN => None,
        text => Some(text.parse::<Lsn>()?),
    };

    Ok(KeeperState {
        node_id,
        group_id,
        current_role: role(CURRENT_ROLE)?,
        assigned_role: role(ASSIGNED_ROLE)?,
        last_monitor_contact,
        last_known_position,
    })
}

//! Line-oriented command parser for the interactive peer.

use session::types::NoteId;
use session::{Command, PeerId, TaskId};

pub const HELP: &str = "\
commands:
  answer <task> <text>     submit an answer for a task
  hint                     use the hint for the current task
  note <x> <y> <text>      pin a note on the corkboard
  edit <note> <text>       replace a note's text
  move <note> <x> <y>      move a note
  drag <note> <x> <y>      drag a note and drop it
  rm <note>                remove a note and its links
  link <a> <b>             toggle a link between two notes
  approve|deny <peer>      answer a join request (host)
  kick <peer>              remove a player for good (host)
  reset                    start the playthrough over (host)
  name <name>              change your display name
  members | state | help | quit";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Commands for the session runtime, in order.
    Session(Vec<Command>),
    Members,
    State,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("empty line")]
    Empty,
    #[error("unknown command `{0}`; try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a number: {0}")]
    Number(String),
}

/// Parse one line typed by the player.
///
/// # Errors
///
/// Returns `Empty` for blank lines, `Unknown` for unrecognized verbs, and
/// `Usage`/`Number` when arguments are missing or malformed.
pub fn parse_line(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match verb {
        "" => return Err(InputError::Empty),
        "members" | "who" => return Ok(Input::Members),
        "state" => return Ok(Input::State),
        "help" | "?" => return Ok(Input::Help),
        "quit" | "leave" | "exit" => return Ok(Input::Quit),
        "answer" => {
            let (task, answer) = split_first(rest).ok_or(InputError::Usage("answer <task> <text>"))?;
            Command::Answer { task_id: TaskId::new(task), answer: answer.to_owned() }
        }
        "hint" => Command::UseHint,
        "note" => {
            let [x, y, ..] = args.as_slice() else {
                return Err(InputError::Usage("note <x> <y> <text>"));
            };
            let text = args[2..].join(" ");
            if text.is_empty() {
                return Err(InputError::Usage("note <x> <y> <text>"));
            }
            Command::AddNote { text, x: number(x)?, y: number(y)? }
        }
        "edit" => {
            let (note, text) = split_first(rest).ok_or(InputError::Usage("edit <note> <text>"))?;
            Command::EditNote { note_id: NoteId::new(note), text: text.to_owned() }
        }
        "move" => {
            let [note, x, y] = args.as_slice() else {
                return Err(InputError::Usage("move <note> <x> <y>"));
            };
            Command::MoveNote { note_id: NoteId::new(*note), x: number(x)?, y: number(y)? }
        }
        "drag" => {
            let [note, x, y] = args.as_slice() else {
                return Err(InputError::Usage("drag <note> <x> <y>"));
            };
            let (x, y) = (number(x)?, number(y)?);
            return Ok(Input::Session(vec![
                Command::BeginDrag { note_id: NoteId::new(*note) },
                Command::DragTo { x, y },
                Command::EndDrag,
            ]));
        }
        "rm" => {
            let [note] = args.as_slice() else {
                return Err(InputError::Usage("rm <note>"));
            };
            Command::RemoveNote { note_id: NoteId::new(*note) }
        }
        "link" => {
            let [a, b] = args.as_slice() else {
                return Err(InputError::Usage("link <a> <b>"));
            };
            Command::ToggleLink { a: NoteId::new(*a), b: NoteId::new(*b) }
        }
        "approve" => Command::Approve(one_peer(&args, "approve <peer>")?),
        "deny" => Command::Deny(one_peer(&args, "deny <peer>")?),
        "kick" => Command::Kick(one_peer(&args, "kick <peer>")?),
        "reset" => Command::Reset,
        "name" => {
            if rest.is_empty() {
                return Err(InputError::Usage("name <name>"));
            }
            Command::SetName(rest.to_owned())
        }
        other => return Err(InputError::Unknown(other.to_owned())),
    };
    Ok(Input::Session(vec![command]))
}

/// First word and the trimmed remainder, both non-empty.
fn split_first(rest: &str) -> Option<(&str, &str)> {
    let (first, remainder) = rest.split_once(char::is_whitespace)?;
    let remainder = remainder.trim();
    if remainder.is_empty() { None } else { Some((first, remainder)) }
}

fn one_peer(args: &[&str], usage: &'static str) -> Result<PeerId, InputError> {
    let [peer] = args else {
        return Err(InputError::Usage(usage));
    };
    Ok(PeerId::new(*peer))
}

fn number(raw: &str) -> Result<f64, InputError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(InputError::Number(raw.to_owned())),
    }
}

#[cfg(test)]
#[path = "input_test.rs"]
mod tests;

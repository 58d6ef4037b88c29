use super::*;

fn single(line: &str) -> Command {
    match parse_line(line) {
        Ok(Input::Session(mut commands)) if commands.len() == 1 => commands.remove(0),
        other => panic!("expected one session command for {line:?}, got {other:?}"),
    }
}

#[test]
fn blank_and_unknown_lines() {
    assert_eq!(parse_line("   "), Err(InputError::Empty));
    assert_eq!(parse_line("dance"), Err(InputError::Unknown("dance".into())));
}

#[test]
fn local_views_and_quit() {
    assert_eq!(parse_line("members"), Ok(Input::Members));
    assert_eq!(parse_line("state"), Ok(Input::State));
    assert_eq!(parse_line("help"), Ok(Input::Help));
    assert_eq!(parse_line("quit"), Ok(Input::Quit));
    assert_eq!(parse_line("leave"), Ok(Input::Quit));
}

#[test]
fn answer_keeps_inner_spaces() {
    assert_eq!(
        single("answer t2   the  butler did it "),
        Command::Answer { task_id: TaskId::new("t2"), answer: "the  butler did it".into() }
    );
    assert_eq!(parse_line("answer t2"), Err(InputError::Usage("answer <task> <text>")));
}

#[test]
fn hint_and_reset_take_no_arguments() {
    assert_eq!(single("hint"), Command::UseHint);
    assert_eq!(single("reset"), Command::Reset);
}

#[test]
fn note_parses_position_then_text() {
    assert_eq!(
        single("note 10 -4.5 gardener lied"),
        Command::AddNote { text: "gardener lied".into(), x: 10.0, y: -4.5 }
    );
    assert_eq!(parse_line("note 10 20"), Err(InputError::Usage("note <x> <y> <text>")));
    assert_eq!(parse_line("note ten 20 x"), Err(InputError::Number("ten".into())));
    assert_eq!(parse_line("note NaN 20 x"), Err(InputError::Number("NaN".into())));
}

#[test]
fn note_editing_commands() {
    assert_eq!(
        single("edit n1 new text"),
        Command::EditNote { note_id: NoteId::new("n1"), text: "new text".into() }
    );
    assert_eq!(
        single("move n1 3 4"),
        Command::MoveNote { note_id: NoteId::new("n1"), x: 3.0, y: 4.0 }
    );
    assert_eq!(single("rm n1"), Command::RemoveNote { note_id: NoteId::new("n1") });
    assert_eq!(
        single("link n1 n2"),
        Command::ToggleLink { a: NoteId::new("n1"), b: NoteId::new("n2") }
    );
    assert_eq!(parse_line("move n1 3"), Err(InputError::Usage("move <note> <x> <y>")));
    assert_eq!(parse_line("link n1"), Err(InputError::Usage("link <a> <b>")));
}

#[test]
fn drag_expands_to_begin_move_end() {
    assert_eq!(
        parse_line("drag n1 7 8"),
        Ok(Input::Session(vec![
            Command::BeginDrag { note_id: NoteId::new("n1") },
            Command::DragTo { x: 7.0, y: 8.0 },
            Command::EndDrag,
        ]))
    );
}

#[test]
fn host_moderation_commands() {
    assert_eq!(single("approve p-2"), Command::Approve(PeerId::new("p-2")));
    assert_eq!(single("deny p-2"), Command::Deny(PeerId::new("p-2")));
    assert_eq!(single("kick p-2"), Command::Kick(PeerId::new("p-2")));
    assert_eq!(parse_line("kick"), Err(InputError::Usage("kick <peer>")));
    assert_eq!(parse_line("kick a b"), Err(InputError::Usage("kick <peer>")));
}

#[test]
fn name_takes_the_rest_of_the_line() {
    assert_eq!(single("name  Inspector Bo "), Command::SetName("Inspector Bo".into()));
    assert_eq!(parse_line("name"), Err(InputError::Usage("name <name>")));
}

use super::*;

#[test]
fn menu_choices_map_to_actions() {
    assert_eq!(MenuChoice::parse("1"), Some(MenuChoice::Chat));
    assert_eq!(MenuChoice::parse("2"), Some(MenuChoice::CreateIndex));
    assert_eq!(MenuChoice::parse("3"), Some(MenuChoice::UpdateIndex));
    assert_eq!(MenuChoice::parse("4"), Some(MenuChoice::ListDocuments));
    assert_eq!(MenuChoice::parse("5"), Some(MenuChoice::SystemInfo));
    assert_eq!(MenuChoice::parse(" 6 \n"), Some(MenuChoice::Exit));
}

#[test]
fn invalid_menu_choices_are_rejected() {
    for input in ["", "0", "7", "one", "1 2", "chat"] {
        assert_eq!(MenuChoice::parse(input), None, "input {:?}", input);
    }
}

#[test]
fn chat_exit_commands() {
    for input in ["exit", "quit", "/exit", "/quit", "EXIT", "  Quit  "] {
        assert_eq!(ChatCommand::parse(input), ChatCommand::Exit, "input {:?}", input);
    }
}

#[test]
fn chat_help_and_list_commands() {
    assert_eq!(ChatCommand::parse("help"), ChatCommand::Help);
    assert_eq!(ChatCommand::parse("/help"), ChatCommand::Help);
    assert_eq!(ChatCommand::parse("list"), ChatCommand::List);
    assert_eq!(ChatCommand::parse("/LIST"), ChatCommand::List);
}

#[test]
fn blank_chat_input_is_ignored() {
    assert_eq!(ChatCommand::parse(""), ChatCommand::Empty);
    assert_eq!(ChatCommand::parse("   \t"), ChatCommand::Empty);
}

#[test]
fn other_chat_input_is_a_query() {
    assert_eq!(
        ChatCommand::parse("  What is the capital of Freedonia?  "),
        ChatCommand::Query("What is the capital of Freedonia?")
    );
    assert_eq!(
        ChatCommand::parse("exit the building"),
        ChatCommand::Query("exit the building")
    );
}

#[test]
fn interrupted_prompt_is_detected() {
    let interrupted = dialoguer::Error::IO(io::Error::new(io::ErrorKind::Interrupted, "ctrl-c"));
    let broken = dialoguer::Error::IO(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));

    assert!(is_interrupt(&interrupted));
    assert!(!is_interrupt(&broken));
}

#[test]
fn header_lines_are_centered() {
    let line = centered("abc");
    assert_eq!(console::measure_text_width(&line), RULE_WIDTH);
    assert!(line.trim() == "abc");
}

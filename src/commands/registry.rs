use super::CommandResult;
use crate::core::session::ChatSession;
use futures_util::future::BoxFuture;

pub type CommandFuture<'a> = BoxFuture<'a, CommandResult>;

pub type CommandHandler = for<'a> fn(&'a mut ChatSession, CommandInvocation<'a>) -> CommandFuture<'a>;

pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    /// Arguments accepted after the name; more than this is an unknown command.
    pub max_args: usize,
    pub handler: CommandHandler,
}

#[derive(Clone, Copy)]
pub struct CommandInvocation<'a> {
    pub input: &'a str,
    pub args: &'a [String],
}

impl<'a> CommandInvocation<'a> {
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).map(String::as_str)
    }
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

/// The command registered as `name` that accepts `arg_count` arguments.
pub fn find_command(name: &str, arg_count: usize) -> Option<&'static Command> {
    all_commands()
        .iter()
        .find(|command| command.name == name && arg_count <= command.max_args)
}

const COMMANDS: &[Command] = &[
    Command {
        name: "new",
        usage: "/new",
        help: "Start a fresh conversation.",
        max_args: 0,
        handler: super::handle_new,
    },
    Command {
        name: "save",
        usage: "/save",
        help: "Export the conversation as Markdown.",
        max_args: 0,
        handler: super::handle_save,
    },
    Command {
        name: "host",
        usage: "/host [address]",
        help: "Show or change the model server host.",
        max_args: 1,
        handler: super::handle_host,
    },
    Command {
        name: "help",
        usage: "/help",
        help: "List the available commands.",
        max_args: 0,
        handler: super::handle_help,
    },
    Command {
        name: "quit",
        usage: "/quit",
        help: "Leave the conversation.",
        max_args: 0,
        handler: super::handle_quit,
    },
];

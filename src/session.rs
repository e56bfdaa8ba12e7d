use crate::core_ftpcommand::{FtpCommand, Reply};

/// Login progress of the control connection.
///
/// The only way forward is
/// `Disconnected -> AwaitBanner -> [AwaitUserAck] -> AwaitPassAck -> AwaitTypeAck -> AwaitPasvAck -> FullyConnected`,
/// with `PasswordRejected` as a dead end after `AwaitUserAck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitBanner,
    AwaitUserAck,
    PasswordRejected,
    AwaitPassAck,
    AwaitTypeAck,
    AwaitPasvAck,
    FullyConnected,
}

impl ConnectionState {
    pub fn is_fully_connected(self) -> bool {
        self == ConnectionState::FullyConnected
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::PasswordRejected
    }
}

/// Owned copies of the login credentials.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// What the client has to do in response to a reply.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition<'c> {
    /// Stage the command, then move to the state. Nothing changes if staging fails.
    Stage(FtpCommand<'c>, ConnectionState),
    /// Move without sending anything.
    Enter(ConnectionState),
    /// A password is required but none is configured.
    RejectPassword,
    /// Parse the PASV reply, record the data endpoint and become fully connected.
    EnterPassive,
    /// Open the data channel of the oldest slot still waiting for one.
    OpenDataChannel,
    Ignore,
}

/// The control state machine: maps the current state and a reply to the next step.
pub fn transition(state: ConnectionState, reply: Reply, login: &Credentials) -> Transition<'_> {
    use ConnectionState::*;

    match (state, reply) {
        (AwaitBanner, Reply::ServiceReady) => match login.username.as_deref() {
            Some(username) => Transition::Stage(FtpCommand::User(username), AwaitUserAck),
            None => Transition::Enter(FullyConnected),
        },
        (AwaitUserAck, Reply::NeedPassword) => match login.password.as_deref() {
            Some(password) => Transition::Stage(FtpCommand::Pass(password), AwaitPassAck),
            None => Transition::RejectPassword,
        },
        (AwaitUserAck | AwaitPassAck, Reply::LoggedIn) => {
            Transition::Stage(FtpCommand::TypeImage, AwaitTypeAck)
        }
        (AwaitTypeAck, Reply::CommandOkay) => Transition::Stage(FtpCommand::Pasv, AwaitPasvAck),
        (AwaitPasvAck | FullyConnected, Reply::EnteringPassive) => Transition::EnterPassive,
        (FullyConnected, Reply::TransferStarting) => Transition::OpenDataChannel,
        _ => Transition::Ignore,
    }
}

//! Composable predicates used to route and correlate messages

use std::fmt;
use std::sync::Arc;

use crate::core::{Address, Command};
use super::message::Message;

/// A predicate over messages
#[derive(Clone)]
pub enum Matcher {
    /// Same class and cmd1; cmd2 is ignored
    Command(Command),
    /// cmd1 only, for either message length
    Cmd1(u8),
    Src(Address),
    Dst(Address),
    /// Direct ack or direct nak
    AckOrNak,
    /// Any all-link broadcast or cleanup message type
    AllLink,
    /// Extended messages only
    Extended,
    /// Relayed copies of the reference message
    DuplicateOf(Box<Message>),
    Not(Box<Matcher>),
    /// True when every matcher is; true for an empty list
    And(Vec<Matcher>),
    /// True when any matcher is; false for an empty list
    Or(Vec<Matcher>),
    Custom(Arc<dyn Fn(&Message) -> bool + Send + Sync>),
}

impl Matcher {
    pub fn command(command: Command) -> Self {
        Matcher::Command(command)
    }

    pub fn src(address: Address) -> Self {
        Matcher::Src(address)
    }

    pub fn dst(address: Address) -> Self {
        Matcher::Dst(address)
    }

    pub fn duplicate_of(msg: &Message) -> Self {
        Matcher::DuplicateOf(Box::new(msg.clone()))
    }

    pub fn not(matcher: Matcher) -> Self {
        Matcher::Not(Box::new(matcher))
    }

    pub fn and(matchers: impl IntoIterator<Item = Matcher>) -> Self {
        Matcher::And(matchers.into_iter().collect())
    }

    pub fn or(matchers: impl IntoIterator<Item = Matcher>) -> Self {
        Matcher::Or(matchers.into_iter().collect())
    }

    pub fn custom(f: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Custom(Arc::new(f))
    }

    /// Matches the request that `ack` acknowledges: a non-ack message sent
    /// to the ack's source with the same cmd1.
    ///
    /// Acks are always standard length, so an extended request is matched
    /// on cmd1 alone.
    pub fn ack(ack: &Message) -> Self {
        Matcher::and([
            Matcher::not(Matcher::AckOrNak),
            Matcher::dst(ack.src),
            Matcher::Cmd1(ack.command.cmd1()),
        ])
    }

    pub fn matches(&self, msg: &Message) -> bool {
        match self {
            Matcher::Command(cmd) => msg.command.same_kind(cmd),
            Matcher::Cmd1(cmd1) => msg.command.cmd1() == *cmd1,
            Matcher::Src(addr) => msg.src == *addr,
            Matcher::Dst(addr) => msg.dst == *addr,
            Matcher::AckOrNak => msg.is_ack() || msg.is_nak(),
            Matcher::AllLink => msg.flags.is_all_link(),
            Matcher::Extended => msg.is_extended(),
            Matcher::DuplicateOf(reference) => msg.is_duplicate_of(reference),
            Matcher::Not(inner) => !inner.matches(msg),
            Matcher::And(all) => all.iter().all(|m| m.matches(msg)),
            Matcher::Or(any) => any.iter().any(|m| m.matches(msg)),
            Matcher::Custom(f) => f(msg),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Command(cmd) => write!(f, "Command({cmd})"),
            Matcher::Cmd1(cmd1) => write!(f, "Cmd1({cmd1:02x})"),
            Matcher::Src(addr) => write!(f, "Src({addr})"),
            Matcher::Dst(addr) => write!(f, "Dst({addr})"),
            Matcher::AckOrNak => write!(f, "AckOrNak"),
            Matcher::AllLink => write!(f, "AllLink"),
            Matcher::Extended => write!(f, "Extended"),
            Matcher::DuplicateOf(msg) => write!(f, "DuplicateOf({msg:?})"),
            Matcher::Not(inner) => write!(f, "Not({inner:?})"),
            Matcher::And(all) => f.debug_tuple("And").field(all).finish(),
            Matcher::Or(any) => f.debug_tuple("Or").field(any).finish(),
            Matcher::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl std::ops::Not for Matcher {
    type Output = Matcher;

    fn not(self) -> Matcher {
        Matcher::not(self)
    }
}

impl std::ops::BitAnd for Matcher {
    type Output = Matcher;

    fn bitand(self, rhs: Matcher) -> Matcher {
        match self {
            Matcher::And(mut all) => {
                all.push(rhs);
                Matcher::And(all)
            }
            lhs => Matcher::And(vec![lhs, rhs]),
        }
    }
}

impl std::ops::BitOr for Matcher {
    type Output = Matcher;

    fn bitor(self, rhs: Matcher) -> Matcher {
        match self {
            Matcher::Or(mut any) => {
                any.push(rhs);
                Matcher::Or(any)
            }
            lhs => Matcher::Or(vec![lhs, rhs]),
        }
    }
}

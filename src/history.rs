//! Recorded operation histories.
//!
//! One record is twelve whitespace separated fields:
//!
//! ```text
//! start_ns end_ns thread op tid passenger route coach departure arrival seat result
//! ```
//!
//! `op` is `buyTicket`, `refundTicket` or `inquiry`. Inquiries carry a zero
//! coach and store the count they returned in the `seat` field.

use crate::records::Ticket;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const FIELDS: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history holds {tokens} tokens, not a multiple of 12")]
    Truncated { tokens: usize },
    #[error("record {record}: bad {field} '{value}'")]
    Field {
        record: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Buy,
    Refund,
    Inquiry,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Buy => "buyTicket",
            Operation::Refund => "refundTicket",
            Operation::Inquiry => "inquiry",
        }
    }
}

impl FromStr for Operation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyTicket" => Ok(Operation::Buy),
            "refundTicket" => Ok(Operation::Refund),
            "inquiry" => Ok(Operation::Inquiry),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryLine {
    pub start_ns: u64,
    pub end_ns: u64,
    pub thread: u64,
    pub operation: Operation,
    pub tid: u64,
    pub passenger: String,
    pub route: u32,
    pub coach: u32,
    pub departure: u32,
    pub arrival: u32,
    /// Seat number, or the returned count for inquiries.
    pub seat: u32,
    pub result: bool,
}

impl HistoryLine {
    pub fn buy(start_ns: u64, end_ns: u64, thread: u64, ticket: &Ticket) -> Self {
        Self {
            start_ns,
            end_ns,
            thread,
            operation: Operation::Buy,
            tid: ticket.tid,
            passenger: ticket.passenger.clone(),
            route: ticket.route,
            coach: ticket.coach,
            departure: ticket.departure,
            arrival: ticket.arrival,
            seat: ticket.seat,
            result: true,
        }
    }

    pub fn refund(start_ns: u64, end_ns: u64, thread: u64, ticket: &Ticket, result: bool) -> Self {
        Self {
            operation: Operation::Refund,
            result,
            ..Self::buy(start_ns, end_ns, thread, ticket)
        }
    }

    /// A buy that found no seat.
    pub fn sold_out(
        start_ns: u64,
        end_ns: u64,
        thread: u64,
        passenger: &str,
        route: u32,
        departure: u32,
        arrival: u32,
    ) -> Self {
        Self {
            start_ns,
            end_ns,
            thread,
            operation: Operation::Buy,
            tid: 0,
            passenger: passenger.to_string(),
            route,
            coach: 0,
            departure,
            arrival,
            seat: 0,
            result: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn inquiry(
        start_ns: u64,
        end_ns: u64,
        thread: u64,
        passenger: &str,
        route: u32,
        departure: u32,
        arrival: u32,
        remaining: usize,
    ) -> Self {
        Self {
            operation: Operation::Inquiry,
            seat: remaining as u32,
            result: true,
            ..Self::sold_out(start_ns, end_ns, thread, passenger, route, departure, arrival)
        }
    }

    fn from_tokens(record: usize, tokens: &[&str]) -> Result<Self, HistoryError> {
        fn field<T: FromStr>(record: usize, name: &'static str, value: &str) -> Result<T, HistoryError> {
            value.parse().map_err(|_| HistoryError::Field {
                record,
                field: name,
                value: value.to_string(),
            })
        }

        Ok(Self {
            start_ns: field(record, "start", tokens[0])?,
            end_ns: field(record, "end", tokens[1])?,
            thread: field(record, "thread", tokens[2])?,
            operation: field(record, "operation", tokens[3])?,
            tid: field(record, "tid", tokens[4])?,
            passenger: tokens[5].to_string(),
            route: field(record, "route", tokens[6])?,
            coach: field(record, "coach", tokens[7])?,
            departure: field(record, "departure", tokens[8])?,
            arrival: field(record, "arrival", tokens[9])?,
            seat: field(record, "seat", tokens[10])?,
            result: field(record, "result", tokens[11])?,
        })
    }
}

impl fmt::Display for HistoryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {} {} {} {}",
            self.start_ns,
            self.end_ns,
            self.thread,
            self.operation.as_str(),
            self.tid,
            self.passenger,
            self.route,
            self.coach,
            self.departure,
            self.arrival,
            self.seat,
            self.result
        )
    }
}

/// Parses records separated by newlines or simply run together on one line.
pub fn parse_history(text: &str) -> Result<Vec<HistoryLine>, HistoryError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() % FIELDS != 0 {
        return Err(HistoryError::Truncated {
            tokens: tokens.len(),
        });
    }

    tokens
        .chunks(FIELDS)
        .enumerate()
        .map(|(record, chunk)| HistoryLine::from_tokens(record + 1, chunk))
        .collect()
}

/// Keeps the buys and refunds of one route, followed by its last inquiry.
pub fn filter_route(lines: &[HistoryLine], route: u32) -> Vec<HistoryLine> {
    let mut kept = Vec::new();
    let mut last_inquiry = None;

    for line in lines.iter().filter(|line| line.route == route) {
        match line.operation {
            Operation::Inquiry => last_inquiry = Some(line.clone()),
            _ => kept.push(line.clone()),
        }
    }

    kept.extend(last_inquiry);
    kept
}

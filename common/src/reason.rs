/// Reason codes reported by the queue manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReasonCode {
    ConnectionBroken = 2009,
    GetInhibited = 2016,
    HconnError = 2018,
    NoMsgAvailable = 2033,
    NotAuthorized = 2035,
    NotOpenForInput = 2037,
    NotOpenForOutput = 2039,
    PutInhibited = 2051,
    QueueFull = 2053,
    QmgrNameError = 2058,
    UnknownObjectName = 2085,
    UnexpectedError = 2195,
}

impl ReasonCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReasonCode::ConnectionBroken => "MQRC_CONNECTION_BROKEN",
            ReasonCode::GetInhibited => "MQRC_GET_INHIBITED",
            ReasonCode::HconnError => "MQRC_HCONN_ERROR",
            ReasonCode::NoMsgAvailable => "MQRC_NO_MSG_AVAILABLE",
            ReasonCode::NotAuthorized => "MQRC_NOT_AUTHORIZED",
            ReasonCode::NotOpenForInput => "MQRC_NOT_OPEN_FOR_INPUT",
            ReasonCode::NotOpenForOutput => "MQRC_NOT_OPEN_FOR_OUTPUT",
            ReasonCode::PutInhibited => "MQRC_PUT_INHIBITED",
            ReasonCode::QueueFull => "MQRC_Q_FULL",
            ReasonCode::QmgrNameError => "MQRC_Q_MGR_NAME_ERROR",
            ReasonCode::UnknownObjectName => "MQRC_UNKNOWN_OBJECT_NAME",
            ReasonCode::UnexpectedError => "MQRC_UNEXPECTED_ERROR",
        }
    }

    /// a get that found no matching message before its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReasonCode::NoMsgAvailable)
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<i32> for ReasonCode {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, i32> {
        Ok(match value {
            2009 => Self::ConnectionBroken,
            2016 => Self::GetInhibited,
            2018 => Self::HconnError,
            2033 => Self::NoMsgAvailable,
            2035 => Self::NotAuthorized,
            2037 => Self::NotOpenForInput,
            2039 => Self::NotOpenForOutput,
            2051 => Self::PutInhibited,
            2053 => Self::QueueFull,
            2058 => Self::QmgrNameError,
            2085 => Self::UnknownObjectName,
            2195 => Self::UnexpectedError,
            other => return Err(other),
        })
    }
}

/// symbolic name of a reason code, the number itself when unknown
pub fn lookup(code: i32) -> String {
    match ReasonCode::try_from(code) {
        Ok(reason) => reason.name().to_string(),
        Err(code) => code.to_string(),
    }
}

use greybus_core::{Bus, DriverResult, GreybusError, Result};
use greybus_message::{Message, OperationResult, MAX_PAYLOAD_SIZE};
use tracing::{error, warn};

/// An inbound request being handled, with the means to answer it.
pub(crate) struct Operation<'a> {
    bus: &'a Bus,
    cport: u16,
    request: Message,
}

impl<'a> Operation<'a> {
    pub(crate) fn new(bus: &'a Bus, cport: u16, request: Message) -> Self {
        Self {
            bus,
            cport,
            request,
        }
    }

    pub(crate) fn bus(&self) -> &'a Bus {
        self.bus
    }

    pub(crate) fn cport(&self) -> u16 {
        self.cport
    }

    pub(crate) fn op_type(&self) -> u8 {
        self.request.op_type()
    }

    pub(crate) fn payload(&self) -> &[u8] {
        self.request.payload()
    }

    /// The request payload if it holds at least `len` bytes.
    ///
    /// A shorter payload is answered with `Invalid` and `None` is returned;
    /// the caller has nothing left to do.
    pub(crate) fn body(&self, len: usize) -> Result<Option<&[u8]>> {
        let payload = self.request.payload();
        if payload.len() < len {
            error!(
                cport = self.cport,
                op_type = self.op_type(),
                len = payload.len(),
                expected = len,
                "dropping short message"
            );
            self.status(OperationResult::Invalid)?;
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Answer with `Success` and `payload`.
    ///
    /// If the response cannot be built the request is still answered, with
    /// the result code of the failure.
    pub(crate) fn reply(&self, payload: &[u8]) -> Result<()> {
        match self
            .bus
            .respond(self.cport, &self.request, OperationResult::Success, payload)
        {
            Err(err @ GreybusError::Message(_)) => self.fail(&err),
            other => other,
        }
    }

    /// Reject a response of `len` bytes before any work is done for it.
    ///
    /// Answers `Overflow` and returns `false` when `len` exceeds one payload.
    pub(crate) fn reserve(&self, len: usize) -> Result<bool> {
        if len <= MAX_PAYLOAD_SIZE {
            return Ok(true);
        }
        error!(
            cport = self.cport,
            op_type = self.op_type(),
            len,
            max = MAX_PAYLOAD_SIZE,
            "response too large"
        );
        self.status(OperationResult::Overflow)?;
        Ok(false)
    }

    /// Answer with `result` and no payload.
    pub(crate) fn status(&self, result: OperationResult) -> Result<()> {
        self.bus.respond_empty(self.cport, &self.request, result)
    }

    /// Answer with the result of a capability call.
    pub(crate) fn complete(&self, outcome: DriverResult<()>) -> Result<()> {
        match outcome {
            Ok(()) => self.status(OperationResult::Success),
            Err(err) => self.fail(&GreybusError::Driver(err)),
        }
    }

    /// Answer with the result code of `err`.
    pub(crate) fn fail(&self, err: &GreybusError) -> Result<()> {
        warn!(
            cport = self.cport,
            op_type = self.op_type(),
            error = %err,
            "operation failed"
        );
        self.status(err.result())
    }

    /// Answer an operation type the protocol does not define.
    pub(crate) fn unknown(&self, result: OperationResult) -> Result<()> {
        error!(
            cport = self.cport,
            op_type = self.op_type(),
            "unknown operation type"
        );
        self.status(result)
    }
}

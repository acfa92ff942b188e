//! GNSS receiver of the SIM868, reporting navigation data as URCs.

use heapless::String;

use crate::{
    channel::CommandChannel,
    command::{CommandTable, Op, Param},
    error::Error,
    transport::Transport,
    urc::Urc,
    MAX_LINE_LEN,
};

pub struct Gnss {
    /// Report period in seconds while the receiver is wanted on
    rate: Option<u8>,
    sentence: Option<String<MAX_LINE_LEN>>,
    generation: u32,
}

impl Gnss {
    pub fn new() -> Self {
        Self {
            rate: None,
            sentence: None,
            generation: 0,
        }
    }

    pub fn rate(&self) -> Option<u8> {
        self.rate
    }

    /// Last navigation report, without the `+UGNSINF:` header
    pub fn sentence(&self) -> Option<&str> {
        self.sentence.as_deref()
    }

    /// Power the receiver and have it report every `rate` seconds.
    pub fn start<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>, rate: u8) -> Result<(), Error> {
        let table = ch.table();
        let on = [Param::Int(1)];
        ch.send(&table.command(Op::GnssPower)?.with_params(&on))
            .into_result()?;
        let urc = [Param::Int(i64::from(rate))];
        ch.send(&table.command(Op::GnssUrc)?.with_params(&urc))
            .into_result()?;

        info!("GNSS started, reporting every {}s", rate);
        self.rate = Some(rate);
        Ok(())
    }

    pub fn stop<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<(), Error> {
        self.rate = None;
        self.sentence = None;

        let table = ch.table();
        let off = [Param::Int(0)];
        ch.send(&table.command(Op::GnssUrc)?.with_params(&off))
            .into_result()?;
        ch.send(&table.command(Op::GnssPower)?.with_params(&off))
            .into_result()?;
        info!("GNSS stopped");
        Ok(())
    }

    /// Restart reporting after a power cycle if it was running
    pub fn resume<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<(), Error> {
        match self.rate {
            Some(rate) => self.start(ch, rate),
            None => Ok(()),
        }
    }

    /// Returns `true` if the modem was power cycled since the last call.
    pub fn sync_generation(&mut self, generation: u32) -> bool {
        if generation == self.generation {
            return false;
        }
        self.generation = generation;
        self.sentence = None;
        true
    }

    /// Keep the payload of a navigation report. Returns `true` if `urc` was one.
    pub fn handle_urc(&mut self, table: &CommandTable, urc: &Urc) -> bool {
        if urc.topic != table.gnss_report {
            return false;
        }
        let mut sentence = String::new();
        // Cannot fail, the payload is a line
        let _ = sentence.push_str(urc.payload.body());
        trace!("GNSS report: {}", sentence.as_str());
        self.sentence = Some(sentence);
        true
    }
}

impl Default for Gnss {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::sim868::SIM868;
    use crate::config::Config;
    use crate::error::ErrorCode;
    use crate::test_helpers::MockTransport;

    fn setup() -> (MockTransport, CommandChannel<'static, MockTransport>) {
        let mock = MockTransport::new();
        let ch = CommandChannel::new(mock.clone(), &SIM868, &Config::new());
        (mock, ch)
    }

    #[test]
    fn start_and_stop() {
        let (mock, mut ch) = setup();
        let mut gnss = Gnss::new();
        mock.expect("AT+CGNSPWR=1", "OK\r\n");
        mock.expect("AT+CGNSURC=5", "OK\r\n");
        gnss.start(&mut ch, 5).unwrap();
        assert_eq!(gnss.rate(), Some(5));

        mock.expect("AT+CGNSURC=0", "OK\r\n");
        mock.expect("AT+CGNSPWR=0", "OK\r\n");
        gnss.stop(&mut ch).unwrap();
        assert_eq!(gnss.rate(), None);
        assert_eq!(
            mock.writes(),
            vec!["AT+CGNSPWR=1\r", "AT+CGNSURC=5\r", "AT+CGNSURC=0\r", "AT+CGNSPWR=0\r"]
        );
    }

    #[test]
    fn start_failure_is_reported() {
        let (mock, mut ch) = setup();
        let mut gnss = Gnss::new();
        mock.expect("AT+CGNSPWR=1", "ERROR\r\n");

        assert_eq!(gnss.start(&mut ch, 1), Err(Error::Modem(ErrorCode::Unknown)));
        assert_eq!(gnss.rate(), None);
    }

    #[test]
    fn keeps_last_report() {
        let (mock, mut ch) = setup();
        let mut gnss = Gnss::new();
        mock.push_rx("+UGNSINF: 1,1,20240101120000.000,52.1,5.1\r\n+UGNSINF: 1,1,20240101120001.000,52.2,5.1\r\n");
        ch.poll().unwrap();

        while let Some(urc) = ch.take_urc(|_| true) {
            assert!(gnss.handle_urc(&SIM868, &urc));
        }
        assert_eq!(gnss.sentence(), Some("1,1,20240101120001.000,52.2,5.1"));

        assert!(gnss.sync_generation(1));
        assert_eq!(gnss.sentence(), None);
        assert!(!gnss.sync_generation(1));
    }

    #[test]
    fn resume_restarts_running_receiver() {
        let (mock, mut ch) = setup();
        let mut gnss = Gnss::new();
        gnss.resume(&mut ch).unwrap();
        assert!(mock.writes().is_empty());

        mock.always("AT+CGNSPWR=1", "OK\r\n");
        mock.always("AT+CGNSURC=2", "OK\r\n");
        gnss.start(&mut ch, 2).unwrap();
        gnss.resume(&mut ch).unwrap();
        assert_eq!(mock.writes().len(), 4);
    }
}

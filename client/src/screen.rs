use std::time::Duration;

use common::validation::FieldError;
use kdam::{
    term::Colorizer,
    tqdm, BarExt, Column, RichProgress, Spinner,
};
use log::debug;
use tokio::{
    select,
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Page {
    Submit,
    Pending,
}

/// Exactly one page is visible at any time.
pub struct Screen {
    page: Page,
    percent: u8,
    tty: bool,
    bar: Option<RichProgress>,
}

fn new_bar() -> RichProgress {
    RichProgress::new(
        tqdm!(total = 100, unit = "%"),
        vec![
            Column::Spinner(Spinner::new(
                &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
                80.0,
                1.0,
            )),
            Column::Text("[bold blue]Validating".to_owned()),
            Column::Animation,
            Column::Percentage(0),
            Column::Text("•".to_owned()),
            Column::ElapsedTime,
        ],
    )
}

impl Screen {
    pub fn new(tty: bool) -> Self {
        Self {
            page: Page::Submit,
            percent: 0,
            tty,
            bar: None,
        }
    }

    pub fn is_visible(&self, page: Page) -> bool {
        self.page == page
    }

    pub fn show(&mut self, page: Page) {
        if self.is_visible(page) {
            return;
        }
        debug!("Showing {page:?} page");
        self.page = page;
        match page {
            Page::Pending if self.tty => self.bar = Some(new_bar()),
            Page::Pending => eprintln!("Uploading..."),
            Page::Submit => {
                if let Some(mut bar) = self.bar.take() {
                    let _ = bar.clear();
                }
            }
        }
    }

    pub fn set_percent(&mut self, percent: u8) {
        if percent == self.percent {
            return;
        }
        self.percent = percent;
        if let Some(bar) = self.bar.as_mut() {
            let _ = bar.update_to(percent as usize);
        } else if self.page == Page::Pending {
            eprintln!("{percent}% complete");
        }
    }

    /// Puts the form back with the server's messages and progress reset.
    pub fn show_field_errors(&mut self, errors: &[FieldError]) {
        self.set_percent(0);
        self.show(Page::Submit);
        for error in errors {
            eprintln!("{}: {}", error.field, error.text.colorize("bold red"));
        }
    }

    /// Leaves the pending page for good.
    pub fn finish(mut self, message: &str) {
        if let Some(bar) = self.bar.as_mut() {
            let _ = bar.write(message.colorize("bold blue"));
            let _ = bar.clear();
        } else {
            eprintln!("{message}");
        }
    }
}

/// Copies the latest percentage onto the screen until `token` is cancelled,
/// then hands the screen back.
pub async fn refresh(mut screen: Screen, token: CancellationToken, mut percent: watch::Receiver<u8>) -> Screen {
    let mut timer = interval(Duration::from_millis(100));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        select! {
            _ = timer.tick() => {
                let p = *percent.borrow_and_update();
                screen.set_percent(p);
                if let Some(bar) = screen.bar.as_mut() {
                    let _ = bar.refresh();
                }
            }
            _ = token.cancelled() => {
                let p = *percent.borrow();
                screen.set_percent(p);
                return screen;
            }
        }
    }
}

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use skin_exchange::{AdminStats, Listing, ListingStatus, Transaction, TransactionStatus};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Listings,
    Ledger,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Listings => Page::Ledger,
            Page::Ledger => Page::Listings,
        }
    }

    pub fn previous(&self) -> Self {
        // Two pages: previous and next coincide
        self.next()
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Listings => "Listings",
            Page::Ledger => "Ledger",
        }
    }
}

/// Status filter on the listings page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFilter {
    All,
    Only(ListingStatus),
}

impl ListingFilter {
    fn matches(&self, listing: &Listing) -> bool {
        match self {
            ListingFilter::All => true,
            ListingFilter::Only(status) => listing.status == *status,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ListingFilter::All => "ALL",
            ListingFilter::Only(status) => status.as_str(),
        }
    }
}

pub struct App {
    pub listings: Vec<Listing>,
    pub filtered_listings: Vec<Listing>,
    pub transactions: Vec<Transaction>,
    pub stats: AdminStats,
    pub listings_state: TableState,
    pub ledger_state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    pub filter: ListingFilter,
}

impl App {
    pub fn new(listings: Vec<Listing>, transactions: Vec<Transaction>, stats: AdminStats) -> Self {
        let mut listings_state = TableState::default();
        if !listings.is_empty() {
            listings_state.select(Some(0));
        }

        let mut ledger_state = TableState::default();
        if !transactions.is_empty() {
            ledger_state.select(Some(0));
        }

        let filtered_listings = listings.clone();

        Self {
            listings,
            filtered_listings,
            transactions,
            stats,
            listings_state,
            ledger_state,
            current_page: Page::Listings,
            show_detail: false,
            filter: ListingFilter::All,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_listing(&self) -> Option<&Listing> {
        self.listings_state
            .selected()
            .and_then(|i| self.filtered_listings.get(i))
    }

    pub fn selected_transaction(&self) -> Option<&Transaction> {
        self.ledger_state.selected().and_then(|i| self.transactions.get(i))
    }

    pub fn apply_filter(&mut self, filter: ListingFilter) {
        self.filter = filter;
        self.filtered_listings = self
            .listings
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();

        // Reset selection to first item
        if !self.filtered_listings.is_empty() {
            self.listings_state.select(Some(0));
        } else {
            self.listings_state.select(None);
        }
    }

    pub fn clear_filter(&mut self) {
        self.apply_filter(ListingFilter::All);
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
        self.show_detail = false;
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
        self.show_detail = false;
    }

    /// Row count and table state of the page on screen
    fn current_table(&mut self) -> (usize, &mut TableState) {
        match self.current_page {
            Page::Listings => (self.filtered_listings.len(), &mut self.listings_state),
            Page::Ledger => (self.transactions.len(), &mut self.ledger_state),
        }
    }

    pub fn next(&mut self) {
        self.move_by(1);
    }

    pub fn previous(&mut self) {
        self.move_by(-1);
    }

    pub fn page_down(&mut self) {
        let (len, state) = self.current_table();
        if len == 0 {
            return;
        }
        let i = state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let (len, state) = self.current_table();
        if len == 0 {
            return;
        }
        let i = state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn first(&mut self) {
        let (len, state) = self.current_table();
        if len > 0 {
            state.select(Some(0));
        }
    }

    pub fn last(&mut self) {
        let (len, state) = self.current_table();
        if len > 0 {
            state.select(Some(len - 1));
        }
    }

    /// Step one row with wrap-around
    fn move_by(&mut self, step: isize) {
        let (len, state) = self.current_table();
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(i) => (i as isize + step).rem_euclid(len as isize) as usize,
            None => 0,
        };
        state.select(Some(i));
    }

    /// Coins moved by completed and disputed deals
    pub fn volume(&self) -> i64 {
        self.transactions.iter().map(|tx| tx.amount).sum()
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::Char('c') => app.clear_filter(),
                KeyCode::Char('1') if app.current_page == Page::Listings => {
                    app.apply_filter(ListingFilter::Only(ListingStatus::Active));
                }
                KeyCode::Char('2') if app.current_page == Page::Listings => {
                    app.apply_filter(ListingFilter::Only(ListingStatus::Sold));
                }
                KeyCode::Char('3') if app.current_page == Page::Listings => {
                    app.apply_filter(ListingFilter::Only(ListingStatus::Cancelled));
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let content = if app.show_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);
        render_detail_panel(f, content_chunks[1], app);
        content_chunks[0]
    } else {
        chunks[1]
    };

    match app.current_page {
        Page::Listings => render_listings(f, content, app),
        Page::Ledger => render_ledger(f, content, app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Listings, Page::Ledger].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    let stats = &app.stats;
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("👥 {}", stats.users),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("💎 {}", stats.vip_users),
        Style::default().fg(Color::Magenta),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("📦 {}", stats.active_listings),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("🤝 {}", stats.transactions),
        Style::default().fg(Color::Cyan),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("💰 {}", stats.total_coins),
        Style::default().fg(Color::Yellow),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    Row::new(cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

fn listing_color(status: ListingStatus) -> Color {
    match status {
        ListingStatus::Active => Color::Green,
        ListingStatus::Sold => Color::Cyan,
        ListingStatus::Cancelled => Color::DarkGray,
    }
}

fn render_listings(f: &mut Frame, area: Rect, app: &mut App) {
    let header = header_row(&["#", "Item", "Quality", "Price", "Status", "Seller", "Views"]);

    let rows = app.filtered_listings.iter().map(|l| {
        let color = listing_color(l.status);
        let cells = vec![
            Cell::from(l.id.to_string()),
            Cell::from(truncate(&l.metadata.item_name, 30)),
            Cell::from(truncate(&l.metadata.quality, 16)),
            Cell::from(l.price.to_string()),
            Cell::from(l.status.as_str()).style(Style::default().fg(color)),
            Cell::from(l.owner_id.to_string()),
            Cell::from(l.view_count.to_string()),
        ];
        Row::new(cells).height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(32),
            Constraint::Length(18),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(14),
            Constraint::Length(7),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Listings "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.listings_state);
}

fn render_ledger(f: &mut Frame, area: Rect, app: &mut App) {
    let header = header_row(&["#", "Date", "Listing", "Buyer", "Seller", "Amount", "Status"]);

    let rows = app.transactions.iter().map(|tx| {
        let color = match tx.status {
            TransactionStatus::Completed => Color::Green,
            TransactionStatus::Pending => Color::Yellow,
            TransactionStatus::Disputed => Color::Red,
        };
        let cells = vec![
            Cell::from(tx.id.to_string()),
            Cell::from(tx.created_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::from(tx.listing_id.to_string()),
            Cell::from(tx.buyer_id.to_string()),
            Cell::from(tx.seller_id.to_string()),
            Cell::from(tx.amount.to_string()).style(Style::default().fg(color)),
            Cell::from(tx.status.as_str()).style(Style::default().fg(color)),
        ];
        Row::new(cells).height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(18),
            Constraint::Length(9),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(10),
            Constraint::Length(11),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(" Ledger - volume {} coins ", app.volume())),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.ledger_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (selected, total) = match app.current_page {
        Page::Listings => (app.listings_state.selected(), app.filtered_listings.len()),
        Page::Ledger => (app.ledger_state.selected(), app.transactions.len()),
    };
    let selected = selected.map(|i| i + 1).unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, total),
        Style::default().fg(Color::Cyan),
    )];

    if app.current_page == Page::Listings {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("Filter: {}", app.filter.label()),
            Style::default().fg(Color::Green),
        ));
        status_spans.push(Span::raw(" ("));
        status_spans.push(Span::styled("1-3", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" status, "));
        status_spans.push(Span::styled("c", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" clear)"));
    }

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Details | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn detail_line(label: &str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {:<10}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let (title, content) = match app.current_page {
        Page::Listings => match app.selected_listing() {
            Some(l) => (
                " Listing Details ",
                vec![
                    detail_line("Item", l.metadata.item_name.clone(), Color::White),
                    detail_line("Quality", l.metadata.quality.clone(), Color::White),
                    detail_line("Price", format!("{} coins", l.price), Color::Yellow),
                    detail_line("Status", l.status.as_str().to_string(), listing_color(l.status)),
                    detail_line("Seller", l.owner_id.to_string(), Color::White),
                    detail_line("Views", l.view_count.to_string(), Color::White),
                    detail_line(
                        "Float",
                        l.metadata
                            .float_value
                            .map(|v| format!("{:.6}", v))
                            .unwrap_or_else(|| "-".to_string()),
                        Color::White,
                    ),
                    detail_line(
                        "Listed",
                        l.created_at.format("%Y-%m-%d %H:%M").to_string(),
                        Color::White,
                    ),
                    Line::from(""),
                    detail_line("Link", truncate(&l.metadata.external_link, 40), Color::Blue),
                ],
            ),
            None => (" Listing Details ", vec![Line::from("  No listing selected")]),
        },
        Page::Ledger => match app.selected_transaction() {
            Some(tx) => (
                " Transaction Details ",
                vec![
                    detail_line("Id", tx.id.to_string(), Color::White),
                    detail_line("Listing", tx.listing_id.to_string(), Color::White),
                    detail_line("Buyer", tx.buyer_id.to_string(), Color::White),
                    detail_line("Seller", tx.seller_id.to_string(), Color::White),
                    detail_line("Amount", format!("{} coins", tx.amount), Color::Yellow),
                    detail_line("Status", tx.status.as_str().to_string(), Color::Cyan),
                    detail_line("Created", tx.created_at.to_rfc3339(), Color::White),
                    detail_line(
                        "Completed",
                        tx.completed_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string()),
                        Color::White,
                    ),
                ],
            ),
            None => (" Transaction Details ", vec![Line::from("  No transaction selected")]),
        },
    };

    let mut content = content;
    content.push(Line::from(""));
    content.push(Line::from(Span::styled(
        "  Press Enter to close",
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    )));

    let detail_panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(title),
    );

    f.render_widget(detail_panel, area);
}

/// Cut to `max_len` characters, marking the cut with "..."
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

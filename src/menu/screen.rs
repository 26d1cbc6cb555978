use crate::{
    services::release::UpdateDirection,
    types::{NetworkMode, PowerAction, ServiceId},
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InfoPage {
    Health,
    Network,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OctetField {
    Ip,
    SubnetMask,
    Gateway,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EditorKind {
    Octets(OctetField),
    Date,
    Time,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MenuScreen {
    Default,
    MainMenu,
    ApplicationMenu,
    ConfigurationMenu,
    NetworkMenu,
    StaticMenu,
    SetStaticIp,
    SetSubnetMask,
    SetGateway,
    DateTimeMenu,
    SetDate,
    SetTime,
    PowerMenu,
    RebootConfirm,
    ShutdownConfirm,
    UpdateMenu,
    VersionSelect,
    UpdateConfirm,
    DowngradeConfirm,
    UpdateProgress,
    InfoOverlay(InfoPage),
    MessageOverlay,
}

/// How a screen interprets buttons
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScreenKind {
    Home,
    List,
    Editor,
    Info,
    /// Ignores buttons until something else moves it on
    Passive,
}

/// Text of an option; dynamic labels are resolved when a frame is drawn
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Label {
    Text(&'static str),
    Service(ServiceId),
    Network(NetworkMode),
    Version(usize),
    CurrentVersion,
    CurrentDateTime,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MenuAction {
    SelectService(ServiceId),
    SelectNetwork(NetworkMode),
    Power(PowerAction),
    CheckUpdates(UpdateDirection),
    PickVersion(usize),
    Install,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Target {
    /// Informational line, selecting it does nothing
    Display,
    Screen(MenuScreen),
    Act(MenuAction),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MenuEntry {
    pub label: Label,
    pub target: Target,
}

const fn open(label: &'static str, screen: MenuScreen) -> Option<MenuEntry> {
    Some(MenuEntry {
        label: Label::Text(label),
        target: Target::Screen(screen),
    })
}

const fn act(label: Label, action: MenuAction) -> Option<MenuEntry> {
    Some(MenuEntry {
        label,
        target: Target::Act(action),
    })
}

const fn display(label: Label) -> Option<MenuEntry> {
    Some(MenuEntry {
        label,
        target: Target::Display,
    })
}

const EXIT: Option<MenuEntry> = open("EXIT", MenuScreen::Default);

const NAMES: &[(&str, MenuScreen)] = &[
    ("default", MenuScreen::Default),
    ("main", MenuScreen::MainMenu),
    ("application", MenuScreen::ApplicationMenu),
    ("configuration", MenuScreen::ConfigurationMenu),
    ("network", MenuScreen::NetworkMenu),
    ("static", MenuScreen::StaticMenu),
    ("set_static_ip", MenuScreen::SetStaticIp),
    ("set_subnet_mask", MenuScreen::SetSubnetMask),
    ("set_gateway", MenuScreen::SetGateway),
    ("datetime", MenuScreen::DateTimeMenu),
    ("set_date", MenuScreen::SetDate),
    ("set_time", MenuScreen::SetTime),
    ("power", MenuScreen::PowerMenu),
    ("reboot_confirm", MenuScreen::RebootConfirm),
    ("shutdown_confirm", MenuScreen::ShutdownConfirm),
    ("update", MenuScreen::UpdateMenu),
    ("version_select", MenuScreen::VersionSelect),
    ("update_confirm", MenuScreen::UpdateConfirm),
    ("downgrade_confirm", MenuScreen::DowngradeConfirm),
    ("update_progress", MenuScreen::UpdateProgress),
    ("health", MenuScreen::InfoOverlay(InfoPage::Health)),
    ("network_info", MenuScreen::InfoOverlay(InfoPage::Network)),
    ("message", MenuScreen::MessageOverlay),
];

impl MenuScreen {
    /// Button-indexed options, slot 0 belongs to K1
    pub fn entries(self) -> [Option<MenuEntry>; 4] {
        use MenuScreen::*;

        match self {
            MainMenu => [
                open("APPLICATION", ApplicationMenu),
                open("CONFIGURATION", ConfigurationMenu),
                open("POWER", PowerMenu),
                EXIT,
            ],
            ApplicationMenu => [
                act(Label::Service(ServiceId::A), MenuAction::SelectService(ServiceId::A)),
                act(Label::Service(ServiceId::B), MenuAction::SelectService(ServiceId::B)),
                None,
                EXIT,
            ],
            ConfigurationMenu => [
                open("NETWORK", NetworkMenu),
                open("SET DATE/TIME", DateTimeMenu),
                open("UPDATE", UpdateMenu),
                EXIT,
            ],
            NetworkMenu => [
                act(Label::Network(NetworkMode::Dhcp), MenuAction::SelectNetwork(NetworkMode::Dhcp)),
                act(
                    Label::Network(NetworkMode::Static),
                    MenuAction::SelectNetwork(NetworkMode::Static),
                ),
                open("SET STATIC", StaticMenu),
                EXIT,
            ],
            StaticMenu => [
                open("IP ADDRESS", SetStaticIp),
                open("SUBNET MASK", SetSubnetMask),
                open("GATEWAY", SetGateway),
                EXIT,
            ],
            DateTimeMenu => [
                display(Label::CurrentDateTime),
                open("SET DATE", SetDate),
                open("SET TIME", SetTime),
                EXIT,
            ],
            PowerMenu => [
                open("REBOOT", RebootConfirm),
                open("SHUTDOWN", ShutdownConfirm),
                None,
                EXIT,
            ],
            RebootConfirm => [
                open("CANCEL", PowerMenu),
                act(Label::Text("REBOOT"), MenuAction::Power(PowerAction::Reboot)),
                None,
                None,
            ],
            ShutdownConfirm => [
                open("CANCEL", PowerMenu),
                act(Label::Text("SHUTDOWN"), MenuAction::Power(PowerAction::Shutdown)),
                None,
                None,
            ],
            UpdateMenu => [
                display(Label::CurrentVersion),
                act(
                    Label::Text("UPGRADE"),
                    MenuAction::CheckUpdates(UpdateDirection::Upgrade),
                ),
                act(
                    Label::Text("DOWNGRADE"),
                    MenuAction::CheckUpdates(UpdateDirection::Downgrade),
                ),
                EXIT,
            ],
            VersionSelect => [
                act(Label::Version(0), MenuAction::PickVersion(0)),
                act(Label::Version(1), MenuAction::PickVersion(1)),
                act(Label::Version(2), MenuAction::PickVersion(2)),
                open("EXIT", UpdateMenu),
            ],
            UpdateConfirm => [
                open("CANCEL", VersionSelect),
                act(Label::Text("UPDATE"), MenuAction::Install),
                None,
                None,
            ],
            DowngradeConfirm => [
                open("CANCEL", VersionSelect),
                act(Label::Text("DOWNGRADE"), MenuAction::Install),
                None,
                None,
            ],
            Default | SetStaticIp | SetSubnetMask | SetGateway | SetDate | SetTime | UpdateProgress
            | InfoOverlay(_) | MessageOverlay => [None; 4],
        }
    }

    pub fn kind(self) -> ScreenKind {
        use MenuScreen::*;

        match self {
            Default => ScreenKind::Home,
            SetStaticIp | SetSubnetMask | SetGateway | SetDate | SetTime => ScreenKind::Editor,
            InfoOverlay(_) => ScreenKind::Info,
            UpdateProgress | MessageOverlay => ScreenKind::Passive,
            _ => ScreenKind::List,
        }
    }

    pub fn editor(self) -> Option<EditorKind> {
        match self {
            MenuScreen::SetStaticIp => Some(EditorKind::Octets(OctetField::Ip)),
            MenuScreen::SetSubnetMask => Some(EditorKind::Octets(OctetField::SubnetMask)),
            MenuScreen::SetGateway => Some(EditorKind::Octets(OctetField::Gateway)),
            MenuScreen::SetDate => Some(EditorKind::Date),
            MenuScreen::SetTime => Some(EditorKind::Time),
            _ => None,
        }
    }

    /// Screen an editor returns to on cancel and apply
    pub fn parent(self) -> MenuScreen {
        use MenuScreen::*;

        match self {
            SetStaticIp | SetSubnetMask | SetGateway => StaticMenu,
            SetDate | SetTime => DateTimeMenu,
            RebootConfirm | ShutdownConfirm => PowerMenu,
            UpdateConfirm | DowngradeConfirm => VersionSelect,
            VersionSelect => UpdateMenu,
            _ => Default,
        }
    }

    pub fn title(self) -> &'static str {
        use MenuScreen::*;

        match self {
            Default => "",
            MainMenu => "MAIN MENU",
            ApplicationMenu => "APPLICATION",
            ConfigurationMenu => "CONFIGURATION",
            NetworkMenu => "NETWORK",
            StaticMenu => "SET STATIC",
            SetStaticIp => "SET IP ADDRESS",
            SetSubnetMask => "SET SUBNET MASK",
            SetGateway => "SET GATEWAY",
            DateTimeMenu => "DATE/TIME",
            SetDate => "SET DATE",
            SetTime => "SET TIME",
            PowerMenu => "POWER",
            RebootConfirm => "REBOOT?",
            ShutdownConfirm => "SHUTDOWN?",
            UpdateMenu => "UPDATE",
            VersionSelect => "SELECT VERSION",
            UpdateConfirm => "UPDATE?",
            DowngradeConfirm => "DOWNGRADE?",
            UpdateProgress => "UPDATING",
            InfoOverlay(InfoPage::Health) => "HEALTH",
            InfoOverlay(InfoPage::Network) => "NETWORK INFO",
            MessageOverlay => "",
        }
    }

    /// Look a screen up by its command name; a `_menu` suffix is accepted
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let name = name.strip_suffix("_menu").unwrap_or(&name);

        NAMES.iter().find(|(n, _)| *n == name).map(|(_, screen)| *screen)
    }

    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, screen)| *screen == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Screens a remote `menu_navigate` may open: everything except the
    /// confirm gates and the screens owned by the update and overlay flows.
    pub fn is_remote_navigable(self) -> bool {
        !matches!(
            self,
            MenuScreen::RebootConfirm
                | MenuScreen::ShutdownConfirm
                | MenuScreen::VersionSelect
                | MenuScreen::UpdateConfirm
                | MenuScreen::DowngradeConfirm
                | MenuScreen::UpdateProgress
                | MenuScreen::MessageOverlay
        )
    }

    /// Screens that keep an update session alive while they are shown.
    /// Coming back to the update menu ends the session so a new check can start.
    pub fn is_update_flow(self) -> bool {
        matches!(
            self,
            MenuScreen::VersionSelect
                | MenuScreen::UpdateConfirm
                | MenuScreen::DowngradeConfirm
                | MenuScreen::UpdateProgress
                | MenuScreen::MessageOverlay
        )
    }
}
